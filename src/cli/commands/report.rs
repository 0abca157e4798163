//! `tc report`: aggregate the usage log into a spend report.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cli::output;
use crate::cli::types::OutputFormat;
use crate::domain::ports::UsageLogStore;

pub async fn handle_report(
    usage_log: &Arc<dyn UsageLogStore>,
    format: OutputFormat,
    days: i64,
) -> Result<()> {
    let since = Utc::now() - Duration::days(days.max(0));
    let entries = usage_log.list_since(since).await.context("could not read usage log")?;

    let mut by_model: HashMap<String, (u64, u64, f64, usize)> = HashMap::new();
    let mut total_cost = 0.0;
    for entry in &entries {
        let slot = by_model.entry(entry.model.clone()).or_default();
        slot.0 += entry.input_tokens;
        slot.1 += entry.output_tokens;
        slot.2 += entry.cost_usd;
        slot.3 += 1;
        total_cost += entry.cost_usd;
    }

    let mut models: Vec<(String, (u64, u64, f64, usize))> = by_model.into_iter().collect();
    models.sort_by(|a, b| b.1 .2.partial_cmp(&a.1 .2).unwrap_or(std::cmp::Ordering::Equal));

    let value = json!({
        "days": days,
        "sessions": entries.len(),
        "total_cost_usd": total_cost,
        "by_model": models
            .iter()
            .map(|(model, (input, output, cost, sessions))| json!({
                "model": model,
                "input_tokens": input,
                "output_tokens": output,
                "cost_usd": cost,
                "sessions": sessions,
            }))
            .collect::<Vec<_>>(),
    });

    output::print(format, &value, || {
        let mut text = format!(
            "Last {days} day(s): {} session(s), ${total_cost:.2} total",
            entries.len(),
        );
        for (model, (input, output, cost, sessions)) in &models {
            text.push_str(&format!(
                "\n  {model}: ${cost:.2} ({sessions} session(s), {}K in / {}K out)",
                input / 1000,
                output / 1000,
            ));
        }
        text
    });
    Ok(())
}
