//! SQL statements for creating, dropping and updating objects

use super::privileges::PrivilegeTarget;
use super::{PgType, password, split_schema};
use crate::config::ClusterConfig;
use anyhow::{Context, Result, bail};
use reconcile::{AttributeDiff, ObjectNode};
use regex::Regex;
use std::sync::LazyLock;

/// Identifiers matching this pattern are emitted without quotes
static PLAIN_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_$]*$").expect("identifier pattern is valid"));

/// Where a statement has to run
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Target {
    /// The maintenance database of the cluster
    Maintenance,
    /// One named database
    Database(String),
    /// Every managed database that currently exists
    AllDatabases,
}

/// One or more queries sent together; several queries form one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub target: Target,
    pub queries: Vec<String>,
}

impl Statement {
    fn single(target: Target, query: String) -> Self {
        Self {
            target,
            queries: vec![query],
        }
    }

    fn transaction(target: Target, queries: Vec<String>) -> Self {
        Self { target, queries }
    }

    pub fn is_transaction(&self) -> bool {
        self.queries.len() > 1
    }

    /// Render as script text, wrapping transactions in BEGIN/COMMIT
    pub fn to_sql(&self) -> String {
        if self.is_transaction() {
            let mut out = String::from("BEGIN;\n");
            for query in &self.queries {
                out.push_str(&format!("{query};\n"));
            }
            out.push_str("COMMIT;\n");
            out
        } else {
            self.queries
                .iter()
                .map(|q| format!("{q};\n"))
                .collect()
        }
    }
}

/// Quote an identifier unless it is a plain lower-case name
pub fn quote_ident(name: &str) -> String {
    if PLAIN_IDENTIFIER.is_match(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Quote a string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Role in GRANT/REVOKE position; `public` is a keyword there
fn role(name: &str) -> String {
    if name.eq_ignore_ascii_case("public") {
        "PUBLIC".to_string()
    } else {
        quote_ident(name)
    }
}

fn required<'a>(node: &'a ObjectNode, attribute: &str) -> Result<&'a str> {
    node.text(attribute)
        .with_context(|| format!("{} has no {attribute}", node.identity))
}

/// `(database, schema)` of a qualified schema name used by `node`
///
/// Nodes that carry a `database` attribute name their database there, and
/// the schema is what follows `database.`. Only schema owners fall back to
/// splitting at the first dot; database names never contain one.
fn schema_parts<'a>(node: &'a ObjectNode, qualified: &'a str) -> Result<(&'a str, &'a str)> {
    if let Some(database) = node.text("database") {
        let schema = qualified
            .strip_prefix(database)
            .and_then(|rest| rest.strip_prefix('.'))
            .with_context(|| {
                format!("schema name '{qualified}' is not in database '{database}'")
            })?;
        return Ok((database, schema));
    }
    split_schema(qualified)
        .with_context(|| format!("schema name '{qualified}' is not qualified as database.schema"))
}

fn privilege_list(node: &ObjectNode, target: PrivilegeTarget) -> Result<String> {
    let privileges = node.values("privileges");
    if privileges.is_empty() {
        bail!("{} has no privileges", node.identity);
    }
    Ok(target.render(&privileges))
}

fn is_all(node: &ObjectNode, target: PrivilegeTarget) -> bool {
    target.is_all(&node.values("privileges"))
}

/// Statements creating `node`
pub fn create(kind: PgType, node: &ObjectNode) -> Result<Vec<Statement>> {
    let name = node.identity.name.as_str();
    let statements = match kind {
        PgType::Group => vec![Statement::single(
            Target::Maintenance,
            format!("CREATE ROLE {}", quote_ident(name)),
        )],
        PgType::User => vec![
            Statement::single(
                Target::Maintenance,
                format!("CREATE USER {}", quote_ident(name)),
            ),
            alter_user(node),
        ],
        PgType::GroupUser => vec![Statement::single(
            Target::Maintenance,
            format!(
                "ALTER GROUP {} ADD USER {}",
                quote_ident(required(node, "group")?),
                quote_ident(required(node, "user")?)
            ),
        )],
        PgType::Database => vec![
            Statement::single(
                Target::Maintenance,
                format!("CREATE DATABASE {}", quote_ident(name)),
            ),
            Statement::single(
                Target::Maintenance,
                format!(
                    "REVOKE ALL PRIVILEGES ON DATABASE {} FROM PUBLIC",
                    quote_ident(name)
                ),
            ),
        ],
        PgType::DatabaseOwner => vec![database_owner(node)?],
        PgType::Schema => {
            let (database, schema) = schema_parts(node, name)?;
            vec![Statement::single(
                Target::Database(database.to_string()),
                format!("CREATE SCHEMA {}", quote_ident(schema)),
            )]
        }
        PgType::SchemaOwner => vec![schema_owner(node)?],
        PgType::DatabasePrivilege => vec![grant_database(node)?],
        PgType::SchemaPrivilege => vec![grant_schema(node)?],
        PgType::SchemaTablesPrivilege => vec![grant_tables(node)?],
        PgType::DefaultPrivilege => vec![grant_default(node)?],
    };
    log::trace!("{} -> {} statement(s)", node.identity, statements.len());
    Ok(statements)
}

/// Statements dropping `node`
///
/// Ownership relationships have nothing to drop: the object keeps its owner
/// until it is re-owned or dropped itself.
pub fn drop(kind: PgType, node: &ObjectNode, cluster: &ClusterConfig) -> Result<Vec<Statement>> {
    let name = node.identity.name.as_str();
    let statements = match kind {
        PgType::Group | PgType::User => drop_role(name, cluster),
        PgType::GroupUser => vec![Statement::single(
            Target::Maintenance,
            format!(
                "ALTER GROUP {} DROP USER {}",
                quote_ident(required(node, "group")?),
                quote_ident(required(node, "user")?)
            ),
        )],
        PgType::Database => vec![
            Statement::single(
                Target::Maintenance,
                format!(
                    "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                     WHERE datname = {} AND pid <> pg_backend_pid()",
                    quote_literal(name)
                ),
            ),
            Statement::single(
                Target::Maintenance,
                format!("DROP DATABASE {}", quote_ident(name)),
            ),
        ],
        PgType::DatabaseOwner | PgType::SchemaOwner => Vec::new(),
        PgType::Schema => {
            let (database, schema) = schema_parts(node, name)?;
            vec![Statement::single(
                Target::Database(database.to_string()),
                format!("DROP SCHEMA {}", quote_ident(schema)),
            )]
        }
        PgType::DatabasePrivilege => {
            let database = required(node, "database")?;
            let grantee = required(node, "grantee")?;
            let privileges = privilege_list(node, PrivilegeTarget::Database)?;
            vec![Statement::single(
                Target::Maintenance,
                format!(
                    "REVOKE {privileges} ON DATABASE {} FROM {}",
                    quote_ident(database),
                    role(grantee)
                ),
            )]
        }
        PgType::SchemaPrivilege => {
            let (database, schema) = schema_parts(node, required(node, "schema")?)?;
            let grantee = required(node, "grantee")?;
            vec![Statement::single(
                Target::Database(database.to_string()),
                format!(
                    "REVOKE ALL ON SCHEMA {} FROM {}",
                    quote_ident(schema),
                    role(grantee)
                ),
            )]
        }
        PgType::SchemaTablesPrivilege => {
            let (database, schema) = schema_parts(node, required(node, "schema")?)?;
            let grantee = required(node, "grantee")?;
            let privileges = privilege_list(node, PrivilegeTarget::Tables)?;
            vec![Statement::single(
                Target::Database(database.to_string()),
                format!(
                    "REVOKE {privileges} ON ALL TABLES IN SCHEMA {} FROM {}",
                    quote_ident(schema),
                    role(grantee)
                ),
            )]
        }
        PgType::DefaultPrivilege => {
            let (database, query) = revoke_default(node)?;
            vec![Statement::single(Target::Database(database), query)]
        }
    };
    Ok(statements)
}

/// Statements applying changed attributes of `node` in place
pub fn update(kind: PgType, node: &ObjectNode, diff: &AttributeDiff) -> Result<Vec<Statement>> {
    log::debug!(
        "Updating {} ({})",
        node.identity,
        diff.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    match kind {
        PgType::User => Ok(vec![alter_user(node)]),
        PgType::DatabaseOwner
        | PgType::SchemaOwner
        | PgType::DatabasePrivilege
        | PgType::SchemaPrivilege
        | PgType::SchemaTablesPrivilege
        | PgType::DefaultPrivilege => create(kind, node),
        _ => bail!("{} cannot be changed in place", node.identity),
    }
}

fn alter_user(node: &ObjectNode) -> Statement {
    let inherit = node
        .attr("inherit")
        .and_then(reconcile::AttrValue::as_bool)
        .unwrap_or(false);
    let mut query = format!(
        "ALTER USER {} WITH NOCREATEDB NOSUPERUSER {} LOGIN",
        quote_ident(&node.identity.name),
        if inherit { "INHERIT" } else { "NOINHERIT" }
    );
    if let Some(password) = node.text("password") {
        let verifier = password::hashed(&node.identity.name, password);
        query.push_str(&format!(" PASSWORD {}", quote_literal(&verifier)));
    }
    Statement::single(Target::Maintenance, query)
}

fn drop_role(name: &str, cluster: &ClusterConfig) -> Vec<Statement> {
    let role = quote_ident(name);
    let revoke_public = format!("REVOKE ALL ON SCHEMA public FROM {role}");
    vec![
        Statement::single(
            Target::AllDatabases,
            format!(
                "REASSIGN OWNED BY {role} TO {}",
                quote_ident(&cluster.master_user)
            ),
        ),
        Statement::single(Target::AllDatabases, revoke_public.clone()),
        Statement::single(
            Target::Database(cluster.master_database.clone()),
            revoke_public,
        ),
        Statement::single(Target::Maintenance, format!("DROP ROLE {role}")),
    ]
}

fn database_owner(node: &ObjectNode) -> Result<Statement> {
    Ok(Statement::single(
        Target::Maintenance,
        format!(
            "ALTER DATABASE {} OWNER TO {}",
            quote_ident(required(node, "database")?),
            quote_ident(required(node, "owner")?)
        ),
    ))
}

fn schema_owner(node: &ObjectNode) -> Result<Statement> {
    let (database, schema) = schema_parts(node, required(node, "schema")?)?;
    Ok(Statement::single(
        Target::Database(database.to_string()),
        format!(
            "ALTER SCHEMA {} OWNER TO {}",
            quote_ident(schema),
            quote_ident(required(node, "owner")?)
        ),
    ))
}

fn grant_database(node: &ObjectNode) -> Result<Statement> {
    let target = PrivilegeTarget::Database;
    let database = quote_ident(required(node, "database")?);
    let grantee = role(required(node, "grantee")?);
    let mut queries = Vec::new();
    if !is_all(node, target) {
        queries.push(format!("REVOKE ALL ON DATABASE {database} FROM {grantee}"));
    }
    queries.push(format!(
        "GRANT {} ON DATABASE {database} TO {grantee}",
        privilege_list(node, target)?
    ));
    Ok(Statement::transaction(Target::Maintenance, queries))
}

fn grant_schema(node: &ObjectNode) -> Result<Statement> {
    let target = PrivilegeTarget::Schema;
    let (database, schema) = schema_parts(node, required(node, "schema")?)?;
    let schema = quote_ident(schema);
    let grantee = role(required(node, "grantee")?);
    let mut queries = Vec::new();
    if !is_all(node, target) {
        queries.push(format!("REVOKE ALL ON SCHEMA {schema} FROM {grantee}"));
    }
    queries.push(format!(
        "GRANT {} ON SCHEMA {schema} TO {grantee}",
        privilege_list(node, target)?
    ));
    Ok(Statement::transaction(
        Target::Database(database.to_string()),
        queries,
    ))
}

fn grant_tables(node: &ObjectNode) -> Result<Statement> {
    let (database, schema) = schema_parts(node, required(node, "schema")?)?;
    let schema = quote_ident(schema);
    let grantee = role(required(node, "grantee")?);
    let queries = vec![
        format!("REVOKE ALL ON ALL TABLES IN SCHEMA {schema} FROM {grantee}"),
        format!(
            "GRANT {} ON ALL TABLES IN SCHEMA {schema} TO {grantee}",
            privilege_list(node, PrivilegeTarget::Tables)?
        ),
    ];
    Ok(Statement::transaction(
        Target::Database(database.to_string()),
        queries,
    ))
}

fn default_prefix(node: &ObjectNode) -> Result<(String, String, String)> {
    let (database, schema) = schema_parts(node, required(node, "schema")?)?;
    let prefix = format!(
        "ALTER DEFAULT PRIVILEGES FOR ROLE {} IN SCHEMA {}",
        quote_ident(required(node, "grantor")?),
        quote_ident(schema)
    );
    Ok((database.to_string(), prefix, role(required(node, "grantee")?)))
}

fn revoke_default(node: &ObjectNode) -> Result<(String, String)> {
    let (database, prefix, grantee) = default_prefix(node)?;
    Ok((database, format!("{prefix} REVOKE ALL ON TABLES FROM {grantee}")))
}

fn grant_default(node: &ObjectNode) -> Result<Statement> {
    let (database, prefix, grantee) = default_prefix(node)?;
    let queries = vec![
        format!("{prefix} REVOKE ALL ON TABLES FROM {grantee}"),
        format!(
            "{prefix} GRANT {} ON TABLES TO {grantee}",
            privilege_list(node, PrivilegeTarget::Tables)?
        ),
    ];
    Ok(Statement::transaction(Target::Database(database), queries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterConfig {
        ClusterConfig::default()
    }

    fn queries(statements: &[Statement]) -> Vec<&str> {
        statements
            .iter()
            .flat_map(|s| s.queries.iter().map(String::as_str))
            .collect()
    }

    #[test]
    fn identifiers_are_quoted_when_needed() {
        assert_eq!(quote_ident("app_user"), "app_user");
        assert_eq!(quote_ident("AppUser"), "\"AppUser\"");
        assert_eq!(quote_ident("my-db"), "\"my-db\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn user_create_sets_login_attributes() {
        let node = ObjectNode::entity("User", "alice")
            .with_attr("password", "s3cret")
            .with_attr("inherit", true);
        let statements = create(PgType::User, &node).unwrap();
        assert_eq!(
            queries(&statements),
            [
                "CREATE USER alice",
                "ALTER USER alice WITH NOCREATEDB NOSUPERUSER INHERIT LOGIN \
                 PASSWORD 'md58213e4d0d5792b064442db7988e9f4c4'",
            ]
        );
    }

    #[test]
    fn role_drop_reassigns_owned_objects_first() {
        let statements = drop(PgType::User, &ObjectNode::entity("User", "bob"), &cluster()).unwrap();
        let targets: Vec<_> = statements.iter().map(|s| s.target.clone()).collect();
        assert_eq!(
            targets,
            [
                Target::AllDatabases,
                Target::AllDatabases,
                Target::Database("postgres".into()),
                Target::Maintenance,
            ]
        );
        assert_eq!(
            queries(&statements),
            [
                "REASSIGN OWNED BY bob TO postgres",
                "REVOKE ALL ON SCHEMA public FROM bob",
                "REVOKE ALL ON SCHEMA public FROM bob",
                "DROP ROLE bob",
            ]
        );
    }

    #[test]
    fn database_create_revokes_public_access() {
        let statements =
            create(PgType::Database, &ObjectNode::entity("Database", "app")).unwrap();
        assert_eq!(
            queries(&statements),
            [
                "CREATE DATABASE app",
                "REVOKE ALL PRIVILEGES ON DATABASE app FROM PUBLIC"
            ]
        );
    }

    #[test]
    fn schema_statements_run_in_their_database() {
        let node = ObjectNode::entity("Schema", "app.reporting");
        let statements = create(PgType::Schema, &node).unwrap();
        assert_eq!(statements[0].target, Target::Database("app".into()));
        assert_eq!(queries(&statements), ["CREATE SCHEMA reporting"]);

        let owner = ObjectNode::entity("SchemaOwner", "app.reporting+alice")
            .with_attr("schema", "app.reporting")
            .with_attr("owner", "alice");
        let statements = update(PgType::SchemaOwner, &owner, &AttributeDiff::new()).unwrap();
        assert_eq!(queries(&statements), ["ALTER SCHEMA reporting OWNER TO alice"]);
    }

    #[test]
    fn hashed_passwords_are_sent_unchanged() {
        let verifier = "SCRAM-SHA-256$4096:c2FsdA==$c3RvcmVk:c2VydmVy";
        let node = ObjectNode::entity("User", "alice").with_attr("password", verifier);
        let statements = update(PgType::User, &node, &AttributeDiff::new()).unwrap();
        assert!(statements[0].queries[0].ends_with(&format!("PASSWORD '{verifier}'")));
    }

    #[test]
    fn dotted_database_names_come_from_the_attribute() {
        let schema = ObjectNode::entity("Schema", "my.db.reporting").with_attr("database", "my.db");
        let statements = create(PgType::Schema, &schema).unwrap();
        assert_eq!(statements[0].target, Target::Database("my.db".into()));
        assert_eq!(queries(&statements), ["CREATE SCHEMA reporting"]);

        let grant = ObjectNode::entity("SchemaTablesPrivilege", "devs@my.db.reporting")
            .with_attr("database", "my.db")
            .with_attr("schema", "my.db.reporting")
            .with_attr("grantee", "devs")
            .with_attr("privileges", ["SELECT"]);
        let statements = create(PgType::SchemaTablesPrivilege, &grant).unwrap();
        assert_eq!(statements[0].target, Target::Database("my.db".into()));
        assert!(statements[0].queries[1].ends_with("IN SCHEMA reporting TO devs"));
    }

    #[test]
    fn schema_outside_its_database_is_rejected() {
        let node = ObjectNode::entity("Schema", "crm.reporting").with_attr("database", "app");
        let err = create(PgType::Schema, &node).unwrap_err();
        assert_eq!(
            err.to_string(),
            "schema name 'crm.reporting' is not in database 'app'"
        );
    }

    #[test]
    fn partial_database_grant_revokes_first() {
        let node = ObjectNode::entity("DatabasePrivilege", "public@app")
            .with_attr("database", "app")
            .with_attr("grantee", "public")
            .with_attr("privileges", ["TEMPORARY", "CONNECT"]);
        let statements = create(PgType::DatabasePrivilege, &node).unwrap();
        assert!(statements[0].is_transaction());
        assert_eq!(
            statements[0].to_sql(),
            "BEGIN;\nREVOKE ALL ON DATABASE app FROM PUBLIC;\n\
             GRANT CONNECT, TEMPORARY ON DATABASE app TO PUBLIC;\nCOMMIT;\n"
        );
    }

    #[test]
    fn full_schema_grant_skips_revoke() {
        let node = ObjectNode::entity("SchemaPrivilege", "devs@app.reporting")
            .with_attr("database", "app")
            .with_attr("schema", "app.reporting")
            .with_attr("grantee", "devs")
            .with_attr("privileges", ["CREATE", "USAGE"]);
        let statements = create(PgType::SchemaPrivilege, &node).unwrap();
        assert_eq!(queries(&statements), ["GRANT ALL ON SCHEMA reporting TO devs"]);
        assert!(!statements[0].is_transaction());
    }

    #[test]
    fn default_privileges_revoke_then_grant() {
        let node = ObjectNode::entity("DefaultPrivilege", "alice:devs@app.reporting")
            .with_attr("grantor", "alice")
            .with_attr("privilege", "devs@app.reporting")
            .with_attr("schema", "app.reporting")
            .with_attr("grantee", "devs")
            .with_attr("privileges", ["SELECT"]);
        let statements = create(PgType::DefaultPrivilege, &node).unwrap();
        assert_eq!(
            queries(&statements),
            [
                "ALTER DEFAULT PRIVILEGES FOR ROLE alice IN SCHEMA reporting REVOKE ALL ON TABLES FROM devs",
                "ALTER DEFAULT PRIVILEGES FOR ROLE alice IN SCHEMA reporting GRANT SELECT ON TABLES TO devs",
            ]
        );
        let dropped = drop(PgType::DefaultPrivilege, &node, &cluster()).unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].target, Target::Database("app".into()));
    }

    #[test]
    fn ownership_drop_emits_nothing() {
        let node = ObjectNode::entity("DatabaseOwner", "app+alice")
            .with_attr("database", "app")
            .with_attr("owner", "alice");
        assert!(drop(PgType::DatabaseOwner, &node, &cluster()).unwrap().is_empty());
    }

    #[test]
    fn missing_attributes_are_reported() {
        let node = ObjectNode::entity("GroupUser", "devs+alice");
        let err = create(PgType::GroupUser, &node).unwrap_err();
        assert_eq!(err.to_string(), "GroupUser:devs+alice has no group");
    }

    #[test]
    fn databases_cannot_change_in_place() {
        let node = ObjectNode::entity("Database", "app");
        assert!(update(PgType::Database, &node, &AttributeDiff::new()).is_err());
    }
}
