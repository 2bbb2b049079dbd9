//! Human-readable rendering of agent payloads for CLI display.
//!
//! Dispatch is a closed match over known (module, subcommand) pairs.
//! Every renderer tolerates missing fields and falls back to
//! pretty-printed JSON.

use serde_json::Value;

/// Render an agent payload for the given command. Unknown commands and
/// unrenderable payloads fall back to pretty JSON.
#[must_use]
pub fn format_agent_output(command: &str, subcommand: Option<&str>, payload: &Value) -> String {
    match (command, subcommand) {
        ("health", Some("disk" | "check-disk-usage" | "check-disk-status")) => {
            format_disk(payload)
        }
        ("health", Some("cpu-memory" | "check-cpu-memory")) => format_cpu_memory(payload),
        ("system", Some("info" | "system-info" | "get-system-info")) => format_system_info(payload),
        _ => pretty(payload),
    }
}

fn format_disk(payload: &Value) -> String {
    let Some(disks) = payload.get("disks").and_then(Value::as_array) else {
        return pretty(payload);
    };

    let mut out = String::from("Disk Usage\n");
    for disk in disks {
        let mount = disk.get("mount").and_then(Value::as_str).unwrap_or("?");
        let total = disk.get("total").and_then(Value::as_str).unwrap_or("?");
        let used = disk.get("used").and_then(Value::as_str).unwrap_or("?");
        let percent = disk
            .get("use_percent")
            .map(render_number)
            .unwrap_or_else(|| "?".into());
        out.push_str(&format!("  {mount}  {used} / {total}  ({percent}%)\n"));
    }
    out
}

fn format_cpu_memory(payload: &Value) -> String {
    let cpu = payload
        .get("cpu_percent")
        .map(render_number)
        .unwrap_or_else(|| "?".into());
    let mem_used = payload
        .get("memory_used_mb")
        .map(render_number)
        .unwrap_or_else(|| "?".into());
    let mem_total = payload
        .get("memory_total_mb")
        .map(render_number)
        .unwrap_or_else(|| "?".into());
    format!("CPU: {cpu}%\nMemory: {mem_used} MB / {mem_total} MB\n")
}

fn format_system_info(payload: &Value) -> String {
    let mut out = String::from("System Information\n");
    for key in ["hostname", "os", "kernel", "uptime"] {
        if let Some(value) = payload.get(key).and_then(Value::as_str) {
            out.push_str(&format!("  {key}: {value}\n"));
        }
    }
    if out == "System Information\n" {
        return pretty(payload);
    }
    out
}

fn render_number(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pretty(payload: &Value) -> String {
    serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
}
