//! `password` - md5 verifier for a role password

use anyhow::{Result, bail};

use crate::Context;
use crate::pg::password;
use crate::ui;

/// Password and verifier shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
struct Credentials {
    password: String,
    verifier: String,
}

fn credentials(username: &str, given: Option<&str>) -> Result<Credentials> {
    if username.is_empty() {
        bail!("Username must not be empty");
    }
    let password = match given {
        Some(value) if password::is_hashed(value) => {
            bail!("Password is already a verifier; pass the clear-text password")
        }
        Some(value) => value.to_string(),
        None => password::generate(password::GENERATED_LENGTH),
    };
    let verifier = password::md5(username, &password);
    Ok(Credentials { password, verifier })
}

pub fn run(ctx: &Context, username: &str, given: Option<&str>) -> Result<()> {
    let credentials = credentials(username, given)?;

    if ctx.quiet {
        println!("{}", credentials.verifier);
        return Ok(());
    }

    ui::header("Role Password");
    ui::kv("Username", username);
    ui::kv("Password", &credentials.password);
    ui::kv("Password MD5", &credentials.verifier);
    if given.is_none() {
        println!();
        ui::dim("Store the password somewhere safe; only the verifier belongs in the objects file");
    }
    Ok(())
}
