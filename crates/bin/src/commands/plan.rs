//! Plan command - one-shot build and diff, nothing applied.

use permsync::{
    Config, GroupTree,
    permission::{Grant, PermissionClient},
};
use serde_json::json;

use crate::cli::PlanArgs;
use crate::output::{OutputFormat, print_table};

/// Run the plan command
pub async fn run(args: &PlanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&args.config)?;
    let engine = config.engine()?;
    let directory = config.directory_client().await?;
    let permissions = config.permission_client()?;

    let tree = GroupTree::build(directory.as_ref()).await?;
    let current = permissions.list_current_grants().await?;
    let plan = engine.plan(&tree, &current);

    match OutputFormat::from_json_flag(args.json) {
        OutputFormat::Json => {
            let body = json!({
                "groups": tree.group_count(),
                "users": tree.user_count(),
                "current_grants": current.len(),
                "additions": plan.additions,
                "removals": plan.removals,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Human => {
            println!(
                "{} groups, {} users, {} current grants",
                tree.group_count(),
                tree.user_count(),
                current.len()
            );
            if plan.is_empty() {
                println!("Nothing to do.");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = plan
                .additions
                .iter()
                .map(|g| row("add", g))
                .chain(plan.removals.iter().map(|g| row("remove", g)))
                .collect();
            println!();
            print_table(&["ACTION", "SUBJECT", "ROLE", "SCOPE"], &rows);
        }
    }
    Ok(())
}

fn row(action: &str, grant: &Grant) -> Vec<String> {
    vec![
        action.to_string(),
        grant.subject.clone(),
        grant.role.clone(),
        grant.scope.clone(),
    ]
}
