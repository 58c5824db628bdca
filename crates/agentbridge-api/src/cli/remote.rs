//! Inspection commands against a running hub's HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde::de::DeserializeOwned;

use agentbridge_types::client::{ClientMetadata, ConnectionState};
use agentbridge_types::envelope::Envelope;
use agentbridge_types::metrics::{HubMetrics, PressureLevel};

use crate::http::response::ApiResponse;

/// Thin client for the `/api/v1` surface.
pub struct HubClient {
    http: reqwest::Client,
    base: String,
}

impl HubClient {
    pub fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: url.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/api/v1{path}", self.base);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("could not reach hub at {}", self.base))?;
        let status = resp.status();
        let body: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("unexpected response from {url} ({status})"))?;

        match (body.data, body.errors.into_iter().next()) {
            (Some(data), _) => Ok(data),
            (None, Some(err)) => bail!("{} ({})", err.message, err.code),
            (None, None) => bail!("empty response from {url} ({status})"),
        }
    }
}

/// `agentbridge status`
pub async fn status(client: &HubClient, json: bool) -> Result<()> {
    let metrics: HubMetrics = client.get("/metrics", &[]).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    println!();
    println!("  {} agentbridge at {}", style("⚡").bold(), style(&client.base).cyan());
    println!("  Uptime:      {}", format_duration(metrics.uptime_secs));
    println!();

    println!("  {}", style("── Traffic ──").dim());
    println!("  Accepted:    {}", style(metrics.messages_accepted).bold());
    println!("  Delivered:   {}", style(metrics.messages_delivered).green());
    println!("  Queued:      {}", metrics.messages_queued);
    println!("  Offloaded:   {}", metrics.messages_offloaded);
    if metrics.messages_dropped > 0 {
        println!("  Dropped:     {}", style(metrics.messages_dropped).yellow());
    }
    if metrics.errors > 0 {
        println!("  Errors:      {}", style(metrics.errors).red());
    }
    println!();

    println!("  {}", style("── Connections ──").dim());
    println!(
        "  Active:      {} ({} total)",
        style(metrics.connections_active).bold(),
        metrics.connections_total
    );
    println!(
        "  Offline:     {} envelopes for {} recipients",
        metrics.offline_queue_depth, metrics.offline_recipients
    );
    println!("  History:     {}/{}", metrics.history_len, metrics.history_capacity);
    println!();

    println!("  {}", style("── Memory ──").dim());
    println!("  Pressure:    {}", styled_level(metrics.memory.level));
    println!(
        "  Heap:        {:.1}% of budget   RSS: {:.1}% of system",
        metrics.memory.heap_ratio * 100.0,
        metrics.memory.resident_ratio * 100.0
    );
    if let Some(rate) = metrics.memory.leak_rate_bytes_per_min {
        println!("  {} RSS growing {:.0} KiB/min", style("!").yellow().bold(), rate / 1024.0);
    }
    println!();

    let w = &metrics.workers;
    println!("  {}", style("── Workers ──").dim());
    println!(
        "  Units:       {} ({} busy, {} queued, {}-{})",
        w.workers, w.busy, w.queued, w.min_workers, w.max_workers
    );
    println!(
        "  Tasks:       {} ok, {} failed, {} timed out, {} crashed",
        w.completed, w.failed, w.timed_out, w.crashed
    );
    if w.detached > 0 {
        println!("  {} {} stuck thread(s) detached", style("!").yellow().bold(), w.detached);
    }
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Pool").fg(Color::White),
        Cell::new("Size").fg(Color::White),
        Cell::new("In use").fg(Color::White),
        Cell::new("Hit rate").fg(Color::White),
        Cell::new("Evicted").fg(Color::White),
    ]);
    for (name, pool) in &metrics.pools {
        table.add_row(vec![
            Cell::new(name).fg(Color::Cyan),
            Cell::new(format!("{}/{}", pool.size, pool.max_size)),
            Cell::new(pool.in_use),
            Cell::new(format!("{:.0}%", pool.hit_rate * 100.0)),
            Cell::new(pool.evicted),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

/// `agentbridge clients`
pub async fn clients(client: &HubClient, json: bool) -> Result<()> {
    let clients: Vec<ClientMetadata> = client.get("/clients", &[]).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&clients)?);
        return Ok(());
    }

    if clients.is_empty() {
        println!();
        println!("  {} No clients connected.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Client").fg(Color::White),
        Cell::new("Role").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Messages").fg(Color::White),
        Cell::new("Errors").fg(Color::White),
        Cell::new("Last seen").fg(Color::White),
    ]);

    for meta in &clients {
        let state_cell = match meta.state {
            ConnectionState::Active => Cell::new("● active").fg(Color::Green),
            ConnectionState::Idle => Cell::new("○ idle").fg(Color::Yellow),
            other => Cell::new(format!("◌ {other}")).fg(Color::DarkGrey),
        };
        let errors = if meta.error_count > 0 {
            Cell::new(meta.error_count).fg(Color::Red)
        } else {
            Cell::new(0)
        };
        table.add_row(vec![
            Cell::new(&meta.id).fg(Color::Cyan),
            Cell::new(&meta.role),
            state_cell,
            Cell::new(meta.message_count),
            errors,
            Cell::new(meta.last_seen.format("%H:%M:%S").to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!("  {} client(s)", clients.len());
    println!();
    Ok(())
}

/// Filters for `agentbridge history`.
pub struct HistoryArgs {
    pub limit: usize,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub intent: Option<String>,
}

impl HistoryArgs {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("limit", self.limit.to_string())];
        if let Some(agent) = &self.agent_id {
            query.push(("agentId", agent.clone()));
        }
        if let Some(task) = &self.task_id {
            query.push(("taskId", task.clone()));
        }
        if let Some(intent) = &self.intent {
            query.push(("intent", intent.clone()));
        }
        query
    }
}

/// `agentbridge history`
pub async fn history(client: &HubClient, args: &HistoryArgs, json: bool) -> Result<()> {
    let envelopes: Vec<Arc<Envelope>> = client.get("/history", &args.query()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&envelopes)?);
        return Ok(());
    }

    if envelopes.is_empty() {
        println!();
        println!("  {} No matching envelopes.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Time").fg(Color::White),
        Cell::new("Intent").fg(Color::White),
        Cell::new("From").fg(Color::White),
        Cell::new("To").fg(Color::White),
        Cell::new("Task").fg(Color::White),
        Cell::new("Id").fg(Color::White),
    ]);
    for envelope in &envelopes {
        let to = match &envelope.to {
            Some(to) => Cell::new(to),
            None => Cell::new("* broadcast").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(envelope.timestamp.format("%H:%M:%S").to_string()).fg(Color::DarkGrey),
            Cell::new(&envelope.intent).fg(Color::Cyan),
            Cell::new(&envelope.from),
            to,
            Cell::new(envelope.task_id.as_deref().unwrap_or("-")),
            Cell::new(short_id(&envelope.id)).fg(Color::DarkGrey),
        ]);
    }
    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn styled_level(level: PressureLevel) -> console::StyledObject<String> {
    let text = level.to_string();
    match level {
        PressureLevel::Low => style(text).green(),
        PressureLevel::Moderate => style(text).yellow(),
        PressureLevel::High | PressureLevel::Critical => style(text).red().bold(),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_duration(secs: u64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_query_omits_unset_filters() {
        let args = HistoryArgs {
            limit: 5,
            agent_id: None,
            task_id: Some("t1".into()),
            intent: None,
        };
        assert_eq!(
            args.query(),
            vec![("limit", "5".to_string()), ("taskId", "t1".to_string())]
        );
    }

    #[test]
    fn formats_durations_and_ids() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7_260), "2h 1m");
        assert_eq!(short_id("0190a1b2-c3d4"), "0190a1b2");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(HubClient::new("http://hub:7420/").base, "http://hub:7420");
    }
}
