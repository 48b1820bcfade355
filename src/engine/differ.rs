//! Plan display

use crate::ui;
use colored::Colorize;
use reconcile::{DiffSummary, ExecutionPlan, PlanAction, PlanEntry, group_by_type};

/// Section title for an object type
fn type_title(object_type: &str) -> &str {
    match object_type {
        "Group" => "Groups",
        "User" => "Users",
        "GroupUser" => "Group memberships",
        "Database" => "Databases",
        "DatabaseOwner" => "Database owners",
        "Schema" => "Schemas",
        "SchemaOwner" => "Schema owners",
        "DatabasePrivilege" => "Database privileges",
        "SchemaPrivilege" => "Schema privileges",
        "SchemaTablesPrivilege" => "Table privileges",
        "DefaultPrivilege" => "Default privileges",
        other => other,
    }
}

/// Short description shown next to an entry
pub fn describe(entry: &PlanEntry) -> String {
    match &entry.action {
        PlanAction::Create => "(will create)".to_string(),
        PlanAction::Drop => "(will drop)".to_string(),
        PlanAction::Update(diff) => {
            let mut parts: Vec<String> = diff
                .iter()
                .filter(|(attribute, _)| attribute.as_str() != "password")
                .map(|(attribute, change)| format!("{attribute}: {change}"))
                .collect();
            if diff.contains_key("password") {
                parts.push("password changed".to_string());
            }
            if let Some(old) = &entry.replaces {
                parts.push(format!("replaces {}", old.name));
            }
            parts.join(", ")
        }
        PlanAction::NoOp => String::new(),
    }
}

/// Display the changes of a plan, grouped by object type
pub fn display_plan(plan: &ExecutionPlan) {
    let summary = DiffSummary::from_plan(plan);
    if !summary.has_changes() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Permission Plan".bold()
    );
    println!("│");

    for (object_type, entries) in group_by_type(plan) {
        println!("│ {}", type_title(object_type).bold());
        for entry in entries {
            println!(
                "│   {} {:<40} {}",
                ui::action_symbol(&entry.action),
                entry.identity().name,
                describe(entry).dimmed()
            );
        }
        println!("│");
    }

    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} create, {} update, {} drop, {} unchanged)",
        summary.total().to_string().bold(),
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.drops.to_string().red(),
        summary.unchanged
    );
    println!("└─────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{AttrChange, AttrValue, AttributeDiff, ObjectIdentity, ObjectNode};

    fn entry(action: PlanAction, replaces: Option<ObjectIdentity>) -> PlanEntry {
        PlanEntry {
            action,
            node: ObjectNode::entity("User", "alice"),
            replaces,
        }
    }

    #[test]
    fn passwords_are_not_shown() {
        let mut diff = AttributeDiff::new();
        diff.insert(
            "password".into(),
            AttrChange {
                from: Some(AttrValue::from("old")),
                to: Some(AttrValue::from("new")),
            },
        );
        diff.insert(
            "inherit".into(),
            AttrChange {
                from: None,
                to: Some(AttrValue::Bool(true)),
            },
        );
        assert_eq!(
            describe(&entry(PlanAction::Update(diff), None)),
            "inherit: - -> true, password changed"
        );
    }

    #[test]
    fn replacements_name_the_previous_object() {
        let old = ObjectIdentity::new("DatabaseOwner", "app+bob");
        assert_eq!(
            describe(&entry(PlanAction::Update(AttributeDiff::new()), Some(old))),
            "replaces app+bob"
        );
        assert_eq!(describe(&entry(PlanAction::Create, None)), "(will create)");
        assert_eq!(describe(&entry(PlanAction::Drop, None)), "(will drop)");
    }

    #[test]
    fn every_type_has_a_title() {
        for kind in crate::pg::PgType::ALL {
            assert_ne!(type_title(kind.tag()), kind.tag());
        }
    }
}
