//! dash-runner: headless runner for the licensee network dashboard.
//!
//! Usage:
//!   dash-runner --records data/sample/licensees.json
//!   dash-runner --generate 500 --seed 7 --out network.json
//!   dash-runner --db dash.db --records export.json --ipc-mode
//!   dash-runner --db dash.db            (serve the last synced network)

use anyhow::Result;
use netdash_core::{
    config::DashConfig,
    error::DashError,
    sample::{generate_network, to_sheet_rows, SampleParams},
    service::DashboardService,
    source::{InMemorySource, JsonFileSource, RecordSource, StoreSource},
    store::DashStore,
};
use serde_json::{json, Value};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcRequest {
    GetOverview,
    GetTree {
        root: Value,
        depth: Option<usize>,
    },
    GetForest {
        depth: Option<usize>,
    },
    GetLicensee {
        code: Value,
    },
    GetMetrics {
        field: String,
        status: Option<String>,
    },
    GetRanking {
        field: String,
        direction: Option<String>,
        limit: Option<usize>,
    },
    GetRisk {
        limit: Option<usize>,
    },
    GetBreakdown {
        by: String,
    },
    Chat {
        message: String,
    },
    Reload,
    CacheStats,
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let generate = parse_arg(&args, "--generate", 0usize);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let db = flag_value(&args, "--db");
    let records = flag_value(&args, "--records");
    let out = flag_value(&args, "--out");

    let config = DashConfig::load(data_dir)?;

    let source: Box<dyn RecordSource> = if generate > 0 {
        let params = SampleParams { size: generate, ..SampleParams::default() };
        let payload = to_sheet_rows(&generate_network(&params, seed));
        if let Some(path) = out {
            std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
            log::info!("runner: wrote {generate} generated rows to {path}");
        }
        Box::new(InMemorySource::from_payload(payload))
    } else if let Some(path) = records {
        Box::new(JsonFileSource::new(path))
    } else if let Some(path) = db {
        Box::new(StoreSource::new(open_store(path)?))
    } else {
        Box::new(JsonFileSource::new(format!("{data_dir}/sample/licensees.json")))
    };

    if !ipc_mode {
        println!("Licensee network dashboard: dash-runner");
        println!("  source:    {}", source.name());
        println!("  db:        {}", db.unwrap_or("(none)"));
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let mut service = DashboardService::new(config, source);
    if let Some(path) = db {
        service = service.with_store(open_store(path)?);
    }

    // A failed first load is not fatal in IPC mode: requests report the
    // error until a `reload` succeeds.
    if let Err(e) = service.reload() {
        if !ipc_mode {
            return Err(e.into());
        }
        log::warn!("runner: initial load failed: {e}");
    }

    if ipc_mode {
        run_ipc_loop(&mut service)?;
    } else {
        print_summary(&mut service)?;
    }
    Ok(())
}

fn open_store(path: &str) -> Result<DashStore> {
    let store = DashStore::open(path)?;
    store.migrate()?;
    Ok(store)
}

fn run_ipc_loop(service: &mut DashboardService) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let request: IpcRequest = match serde_json::from_str(&buffer) {
            Ok(r) => r,
            Err(e) => {
                let err_json = json!({ "error": e.to_string(), "kind": "client" });
                writeln!(stdout, "{err_json}")?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(request, IpcRequest::Quit) {
            break;
        }

        let reply = match handle_request(service, request) {
            Ok(value) => value,
            Err(e) => json!({
                "error": e.to_string(),
                "kind": e.kind(),
                "retryable": e.is_retryable(),
            }),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_request(service: &mut DashboardService, request: IpcRequest) -> Result<Value, DashError> {
    let value = match request {
        IpcRequest::GetOverview => serde_json::to_value(service.overview()?)?,
        IpcRequest::GetTree { root, depth } => {
            let tree = service.network_tree(&id_text(&root), depth)?;
            json!({ "tree": tree })
        }
        IpcRequest::GetForest { depth } => serde_json::to_value(service.forest(depth)?)?,
        IpcRequest::GetLicensee { code } => {
            let detail = service.licensee(&id_text(&code))?;
            json!({ "licensee": detail })
        }
        IpcRequest::GetMetrics { field, status } => {
            serde_json::to_value(service.metrics(&field, status.as_deref())?)?
        }
        IpcRequest::GetRanking { field, direction, limit } => {
            let ranking = service.ranking(&field, direction.as_deref(), limit)?;
            json!({ "ranking": ranking })
        }
        IpcRequest::GetRisk { limit } => serde_json::to_value(service.risk_report(limit)?)?,
        IpcRequest::GetBreakdown { by } => {
            json!({ "rows": service.breakdown(&by)? })
        }
        IpcRequest::Chat { message } => serde_json::to_value(service.chat(&message, None))?,
        IpcRequest::Reload => serde_json::to_value(service.reload()?)?,
        IpcRequest::CacheStats => serde_json::to_value(service.cache_stats())?,
        IpcRequest::Quit => Value::Null,
    };
    Ok(value)
}

/// Ids arrive as JSON strings or numbers; validation happens in the service.
fn id_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_summary(service: &mut DashboardService) -> Result<()> {
    let overview = service.overview()?;
    println!("=== NETWORK SUMMARY ===");
    println!("  licensees:       {}", overview.total);
    println!("  active:          {}", overview.active);
    println!("  inactive:        {}", overview.inactive);
    println!("  pending:         {}", overview.pending);
    println!("  activation rate: {:.1}%", overview.activation_rate * 100.0);
    println!("  active clients:  {}", overview.total_active_clients);
    println!("  telecom clients: {}", overview.total_telecom_clients);
    println!("  roots:           {}", overview.roots);
    println!("  orphans:         {}", overview.orphans);
    println!("  max depth:       {}", overview.max_depth);

    if let Some(load) = service.last_load() {
        let report = &load.report;
        println!();
        println!("=== INGEST ===");
        println!("  rows seen:       {}", report.rows_seen);
        println!("  accepted:        {}", report.accepted);
        println!("  rejected:        {}", report.rejected.len());
        println!("  duplicates:      {}", report.duplicate_codes.len());
        if let Some(batch) = &load.batch_id {
            println!("  batch:           {batch}");
        }
    }

    let clients = service.metrics("active_clients", None)?;
    println!();
    println!("=== ACTIVE CLIENTS ===");
    println!(
        "  mean {:.1} | sd {:.1} | q1 {:.0} | median {:.0} | q3 {:.0} | max {:.0}",
        clients.mean,
        clients.std_dev,
        clients.quartiles.q1,
        clients.quartiles.q2,
        clients.quartiles.q3,
        clients.max
    );

    println!();
    println!("=== TOP 5 ===");
    for entry in service.ranking("active_clients", Some("desc"), Some(5))? {
        println!("  {:>2}. {:<28} {:>6.0}", entry.rank, entry.name, entry.value);
    }

    let risk = service.risk_report(Some(5))?;
    println!();
    println!(
        "=== RISK === urgent {} | monitor {} | low {}",
        risk.summary.urgent, risk.summary.monitor, risk.summary.low_risk
    );
    for a in &risk.assessments {
        println!("  {:<28} {:>5.0}  {}", a.name, a.score, a.factors.join(", "));
    }

    println!();
    println!("=== BY STATE ===");
    for row in service.breakdown("state")?.iter().take(5) {
        println!("  {:<4} {:>5} ({} active)", row.key, row.count, row.active_count);
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
