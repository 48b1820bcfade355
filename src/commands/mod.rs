// plan, apply and inspect
pub mod declarative;

pub mod password;
