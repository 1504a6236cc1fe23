//! Health check command - checks readiness of a running permsync server.

use std::time::Duration;

use crate::cli::HealthArgs;

/// Run the health check command
pub async fn run(args: &HealthArgs) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("http://{}:{}/admin/ready", args.host, args.port);
    let timeout = Duration::from_secs(args.timeout);

    let client = reqwest::Client::builder().timeout(timeout).build()?;

    match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            let body: serde_json::Value = response.json().await?;
            let status = body.get("status").and_then(|s| s.as_str()).unwrap_or("");
            if status == "ready" {
                println!("ready: {body}");
                Ok(())
            } else {
                eprintln!("not ready: server returned status {status}");
                std::process::exit(1);
            }
        }
        Ok(response) => {
            eprintln!("not ready: server returned HTTP status {}", response.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("not ready: failed to connect to {url}: {e}");
            std::process::exit(1);
        }
    }
}
