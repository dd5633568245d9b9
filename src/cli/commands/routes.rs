use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::router::RouteSummary;
use crate::server::build_state;

/// Print every mapped route. Registration errors surface as the command's error.
pub fn handle(config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let state = build_state(config)?;
    let summaries = state.dispatcher.table().summaries();

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Text => {
            for summary in &summaries {
                println!("{}", format_summary(summary));
            }
            println!("{} routes", summaries.len());
        }
    }
    Ok(())
}

fn format_summary(summary: &RouteSummary) -> String {
    let access = if !summary.secure {
        "public".to_string()
    } else if summary.permissions.is_empty() {
        "authenticated".to_string()
    } else {
        let permissions: Vec<&str> = summary.permissions.iter().map(|p| p.as_str()).collect();
        format!(
            "{}:[{}]",
            summary.scope.as_deref().unwrap_or("-"),
            permissions.join(",")
        )
    };
    format!(
        "{:<7} {:<40} {:<24} {:>3}  {}",
        summary.method, summary.url, summary.handler, summary.status, access
    )
}
