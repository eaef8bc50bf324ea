//! desk-runner: headless runner for the complaint desk core.
//!
//! Usage:
//!   desk-runner --db desk.db --data-dir ./data
//!   desk-runner --db desk.db --ipc-mode
//!   desk-runner --db desk.db --now 2024-06-01T12:00:00Z --seed 7
//!
//! In IPC mode every stdin line is one JSON command (`{"type": "...", ...}`)
//! and every stdout line is one JSON response: `{"ok": ...}` or
//! `{"error": {"kind": "...", "message": "..."}}`.

use anyhow::Result;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use ticketdesk_core::{
    analytics::{AnalyticsAggregator, CorpusFilter, DateRange},
    assignment::Agent,
    clock::{Clock, ManualClock, SystemClock},
    complaint::{ComplaintUpdate, Department, NewComplaint, Status},
    config::DeskConfig,
    lifecycle::ComplaintLifecycle,
    rng::TicketCodeGenerator,
    store::{ComplaintQuery, DeskStore},
    types::Timestamp,
    DeskError, DeskResult,
};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    // Lifecycle
    Create(NewComplaint),
    Get { complaint_id: String },
    List(ComplaintQuery),
    Assign { complaint_id: String, agent_id: String, actor: String },
    SetStatus { complaint_id: String, status: Status, actor: String },
    Resolve { complaint_id: String, actor: String, note: Option<String> },
    Escalate { complaint_id: String, actor: String, reason: Option<String> },
    Comment { complaint_id: String, actor: String, text: String },
    Attach { complaint_id: String, actor: String, filename: String, url: String },
    Rate { complaint_id: String, rating: u8 },
    Update { complaint_id: String, actor: String, update: ComplaintUpdate },
    CheckSla { complaint_id: String, now: Option<String> },
    SweepSla { now: Option<String> },
    // Agents
    RegisterAgent(Agent),
    SetAgentActive { agent_id: String, active: bool },
    AgentWorkload { agent_id: String },
    // Analytics
    Dashboard { start_date: Option<String>, end_date: Option<String>, department: Option<String> },
    DepartmentAnalytics,
    Trends { months: Option<u32> },
    Categories,
    Priorities,
    ResolutionTime,
    SlaCompliance,
    AgentPerformance { department: Option<String> },
    CustomRange {
        start_date: String,
        end_date: String,
        #[serde(default)]
        departments: Vec<String>,
        metrics: Vec<String>,
    },
    Realtime,
    DepartmentStats { department: String },
    Export { start_date: Option<String>, end_date: Option<String>, department: Option<String> },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 0u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");

    let clock: Arc<dyn Clock> = match flag_value(&args, "--now") {
        Some(raw) => Arc::new(ManualClock::new(parse_instant(raw)?)),
        None => Arc::new(SystemClock),
    };
    let codes = if seed == 0 {
        TicketCodeGenerator::from_entropy()
    } else {
        TicketCodeGenerator::seeded(seed)
    };

    if !ipc_mode {
        println!("Complaint Desk: desk-runner");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  now:       {}", clock.now().to_rfc3339());
        println!();
    }

    let config = DeskConfig::load(data_dir)?;
    let store = if db == ":memory:" {
        DeskStore::in_memory()?
    } else {
        DeskStore::open(db)?
    };
    store.migrate()?;

    let desk = ComplaintLifecycle::new(store, &config, clock, Arc::new(codes));
    for agent in &config.agents {
        desk.assignment().register_agent(desk.store(), agent)?;
    }
    log::info!("Seeded {} agents from {data_dir}", config.agents.len());

    if ipc_mode {
        run_ipc_loop(&desk)?;
    } else {
        print_summary(&desk)?;
    }

    Ok(())
}

fn run_ipc_loop(desk: &ComplaintLifecycle) -> Result<()> {
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

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({
                    "error": { "kind": "bad_command", "message": e.to_string() }
                });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let response = match handle_command(desk, cmd) {
            Ok(value) => serde_json::json!({ "ok": value }),
            Err(e) => {
                log::debug!("Command failed: {e}");
                serde_json::json!({ "error": { "kind": e.kind(), "message": e.to_string() } })
            }
        };
        writeln!(stdout, "{}", response)?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(desk: &ComplaintLifecycle, cmd: IpcCommand) -> DeskResult<serde_json::Value> {
    let store = desk.store();
    let value = match cmd {
        IpcCommand::Create(intake) => to_json(&desk.create(intake)?)?,
        IpcCommand::Get { complaint_id } => to_json(&desk.get(&complaint_id)?)?,
        IpcCommand::List(query) => to_json(&store.list_complaints(&query)?)?,
        IpcCommand::Assign { complaint_id, agent_id, actor } => {
            to_json(&desk.assign(&complaint_id, &agent_id, &actor)?)?
        }
        IpcCommand::SetStatus { complaint_id, status, actor } => {
            to_json(&desk.set_status(&complaint_id, status, &actor)?)?
        }
        IpcCommand::Resolve { complaint_id, actor, note } => {
            to_json(&desk.resolve(&complaint_id, &actor, note.as_deref())?)?
        }
        IpcCommand::Escalate { complaint_id, actor, reason } => {
            to_json(&desk.escalate(&complaint_id, &actor, reason.as_deref())?)?
        }
        IpcCommand::Comment { complaint_id, actor, text } => {
            to_json(&desk.add_comment(&complaint_id, &actor, &text)?)?
        }
        IpcCommand::Attach { complaint_id, actor, filename, url } => {
            to_json(&desk.add_attachment(&complaint_id, &actor, &filename, &url)?)?
        }
        IpcCommand::Rate { complaint_id, rating } => to_json(&desk.rate(&complaint_id, rating)?)?,
        IpcCommand::Update { complaint_id, actor, update } => {
            to_json(&desk.update_details(&complaint_id, &actor, update)?)?
        }
        IpcCommand::CheckSla { complaint_id, now } => {
            let now = now_or_clock(desk, now.as_deref())?;
            serde_json::json!({ "breached": desk.check_sla(&complaint_id, now)? })
        }
        IpcCommand::SweepSla { now } => {
            let now = now_or_clock(desk, now.as_deref())?;
            serde_json::json!({ "flipped": desk.sweep_sla_breaches(now)? })
        }
        IpcCommand::RegisterAgent(agent) => {
            desk.assignment().register_agent(store, &agent)?;
            to_json(&agent)?
        }
        IpcCommand::SetAgentActive { agent_id, active } => {
            desk.assignment().set_agent_active(store, &agent_id, active)?;
            to_json(&store.get_agent(&agent_id)?)?
        }
        IpcCommand::AgentWorkload { agent_id } => {
            to_json(&desk.assignment().agent_workload(store, &agent_id)?)?
        }
        IpcCommand::Dashboard { start_date, end_date, department } => {
            let filter = CorpusFilter::from_iso(
                start_date.as_deref(),
                end_date.as_deref(),
                department.as_deref(),
            )?;
            let corpus = store.load_corpus(&filter)?;
            to_json(&AnalyticsAggregator::new(&corpus).dashboard_overview(&filter))?
        }
        IpcCommand::DepartmentAnalytics => {
            let corpus = store.load_corpus(&CorpusFilter::all())?;
            to_json(&AnalyticsAggregator::new(&corpus).department_analytics())?
        }
        IpcCommand::Trends { months } => {
            let corpus = store.load_corpus(&CorpusFilter::all())?;
            to_json(&AnalyticsAggregator::new(&corpus).trend_analysis(months.unwrap_or(6), desk.now()))?
        }
        IpcCommand::Categories => {
            let corpus = store.load_corpus(&CorpusFilter::all())?;
            to_json(&AnalyticsAggregator::new(&corpus).category_distribution())?
        }
        IpcCommand::Priorities => {
            let corpus = store.load_corpus(&CorpusFilter::all())?;
            to_json(&AnalyticsAggregator::new(&corpus).priority_distribution())?
        }
        IpcCommand::ResolutionTime => {
            let corpus = store.load_corpus(&CorpusFilter::all())?;
            to_json(&AnalyticsAggregator::new(&corpus).resolution_time_analysis())?
        }
        IpcCommand::SlaCompliance => {
            let corpus = store.load_corpus(&CorpusFilter::all())?;
            to_json(&AnalyticsAggregator::new(&corpus).sla_compliance())?
        }
        IpcCommand::AgentPerformance { department } => {
            let department = department.as_deref().map(parse_department).transpose()?;
            let corpus = store.load_corpus(&CorpusFilter::all())?;
            let directory = store.list_agents()?;
            to_json(&AnalyticsAggregator::new(&corpus).agent_performance(department, &directory))?
        }
        IpcCommand::CustomRange { start_date, end_date, departments, metrics } => {
            let range = DateRange::parse_iso(&start_date, &end_date)?;
            let departments = departments
                .iter()
                .map(|d| parse_department(d))
                .collect::<DeskResult<Vec<_>>>()?;
            let corpus = store.load_corpus(&CorpusFilter {
                date_range: Some(range),
                department: None,
            })?;
            to_json(&AnalyticsAggregator::new(&corpus).custom_range_analytics(range, &departments, &metrics)?)?
        }
        IpcCommand::Realtime => {
            let corpus = store.load_corpus(&CorpusFilter::all())?;
            to_json(&AnalyticsAggregator::new(&corpus).realtime_metrics(desk.now()))?
        }
        IpcCommand::DepartmentStats { department } => {
            let department = parse_department(&department)?;
            let corpus = store.load_corpus(&CorpusFilter {
                date_range: None,
                department: Some(department),
            })?;
            to_json(&AnalyticsAggregator::new(&corpus).department_stats(department))?
        }
        IpcCommand::Export { start_date, end_date, department } => {
            let filter = CorpusFilter::from_iso(
                start_date.as_deref(),
                end_date.as_deref(),
                department.as_deref(),
            )?;
            let corpus = store.load_corpus(&filter)?;
            to_json(&AnalyticsAggregator::new(&corpus).export_report(&filter))?
        }
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

fn print_summary(desk: &ComplaintLifecycle) -> Result<()> {
    let now = desk.now();
    let flipped = desk.sweep_sla_breaches(now)?;
    let corpus = desk.store().load_corpus(&CorpusFilter::all())?;
    let analytics = AnalyticsAggregator::new(&corpus);
    let overview = analytics.dashboard_overview(&CorpusFilter::all());
    let realtime = analytics.realtime_metrics(now);

    println!("=== DESK SUMMARY ===");
    println!("  complaints:      {}", overview.total_complaints);
    println!("  resolved:        {}", overview.resolved_complaints);
    println!("  pending:         {}", overview.pending_complaints);
    println!("  escalated:       {}", overview.escalated_complaints);
    println!("  resolution rate: {:.2}%", overview.resolution_rate);
    println!("  avg resolution:  {:.2} days", overview.avg_resolution_time_days);
    println!("  critical open:   {}", realtime.critical_open);
    println!("  newly breached:  {}", flipped.len());

    println!();
    println!("=== SLA COMPLIANCE ===");
    let compliance = analytics.sla_compliance();
    if compliance.is_empty() {
        println!("  (No complaints filed yet)");
    } else {
        for row in compliance {
            println!(
                "  {:<8} | total: {:>4} | breached: {:>4} | compliance: {:.1}%",
                row.department.code(),
                row.total,
                row.breached,
                row.compliance_rate
            );
        }
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> DeskResult<serde_json::Value> {
    serde_json::to_value(value).map_err(Into::into)
}

fn parse_department(code: &str) -> DeskResult<Department> {
    Department::parse(code)
        .ok_or_else(|| DeskError::Validation(format!("Unknown department '{code}'")))
}

fn now_or_clock(desk: &ComplaintLifecycle, raw: Option<&str>) -> DeskResult<Timestamp> {
    match raw {
        Some(raw) => parse_instant(raw)
            .map_err(|e| DeskError::Validation(e.to_string())),
        None => Ok(desk.now()),
    }
}

fn parse_instant(raw: &str) -> Result<Timestamp> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| anyhow::anyhow!("Invalid timestamp '{raw}': {e}"))
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
