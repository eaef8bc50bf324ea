//! Concurrent writers on one file-backed database: no lost timeline entries.

use chrono::{TimeZone, Utc};
use std::{sync::Arc, thread};
use ticketdesk_core::{
    assignment::Agent,
    clock::ManualClock,
    complaint::{Department, NewComplaint, NewReporter, Status},
    config::DeskConfig,
    lifecycle::ComplaintLifecycle,
    rng::TicketCodeGenerator,
    store::DeskStore,
    timeline::TimelineAction,
};

const THREADS: usize = 8;
const OPS_PER_THREAD: usize = 5;

fn shared_desk(dir: &tempfile::TempDir) -> ComplaintLifecycle {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = dir.path().join("desk.db");
    let store = DeskStore::open(path.to_str().unwrap()).unwrap();
    store.migrate().unwrap();
    let mut config = DeskConfig::default_test();
    config.lifecycle.max_write_retries = 500;
    let desk = ComplaintLifecycle::new(
        store,
        &config,
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 8, 1, 9, 0, 0).unwrap())),
        Arc::new(TicketCodeGenerator::seeded(11)),
    );
    for id in ["crm-a", "crm-b"] {
        desk.assignment()
            .register_agent(
                desk.store(),
                &Agent {
                    agent_id: id.into(),
                    name: id.into(),
                    email: format!("{id}@utility.example"),
                    department: Department::Crm,
                    is_active: true,
                },
            )
            .unwrap();
    }
    desk
}

fn file(desk: &ComplaintLifecycle, title: &str) -> String {
    desk.create(NewComplaint {
        title: title.into(),
        description: "Raised at the counter".into(),
        department: "CRM".into(),
        category: "Communication".into(),
        reported_by: NewReporter {
            name: "Uma".into(),
            email: "uma@example.com".into(),
            ..NewReporter::default()
        },
        ..NewComplaint::default()
    })
    .unwrap()
    .complaint_id()
    .to_string()
}

/// Eight threads each add five comments to the same complaint: the
/// timeline ends with the `created` entry plus exactly forty more.
#[test]
fn concurrent_comments_are_all_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let desk = shared_desk(&dir);
    let code = file(&desk, "Queue too long");

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let worker = desk.reopen().unwrap();
            let code = code.clone();
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    worker
                        .add_comment(&code, &format!("agent-{t}"), &format!("note {t}.{i}"))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let c = desk.get(&code).unwrap();
    let expected = 1 + THREADS * OPS_PER_THREAD;
    assert_eq!(c.timeline().len(), expected, "lost timeline entries");
    assert_eq!(c.comments().len(), THREADS * OPS_PER_THREAD);
    assert_eq!(c.version(), (THREADS * OPS_PER_THREAD) as i64);

    // Every thread's comments keep their own order.
    for t in 0..THREADS {
        let mine: Vec<&str> = c
            .comments()
            .iter()
            .filter(|cm| cm.user == format!("agent-{t}"))
            .map(|cm| cm.comment.as_str())
            .collect();
        let want: Vec<String> = (0..OPS_PER_THREAD).map(|i| format!("note {t}.{i}")).collect();
        assert_eq!(mine, want, "thread {t} comments out of order");
    }
}

/// Racing reassignments leave the complaint in exactly one agent's set,
/// the one the complaint names.
#[test]
fn racing_assignments_leave_one_owner() {
    let dir = tempfile::tempdir().unwrap();
    let desk = shared_desk(&dir);
    let code = file(&desk, "Wrong letter");

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let worker = desk.reopen().unwrap();
            let code = code.clone();
            let agent = if t % 2 == 0 { "crm-a" } else { "crm-b" };
            thread::spawn(move || {
                for _ in 0..OPS_PER_THREAD {
                    worker.assign(&code, agent, "lead").unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let c = desk.get(&code).unwrap();
    assert_eq!(c.status(), Status::InProgress);
    let owner = c.assigned_to().unwrap().to_string();
    let other = if owner == "crm-a" { "crm-b" } else { "crm-a" };
    assert_eq!(desk.store().agent_assigned_set(&owner).unwrap(), vec![code.clone()]);
    assert!(desk.store().agent_assigned_set(other).unwrap().is_empty());

    let assigned = c
        .timeline()
        .iter()
        .filter(|e| e.action == TimelineAction::Assigned)
        .count();
    assert_eq!(assigned, THREADS * OPS_PER_THREAD);
}

/// Writers on different complaints do not interfere; codes stay unique.
#[test]
fn independent_complaints_in_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let desk = shared_desk(&dir);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let worker = desk.reopen().unwrap();
            thread::spawn(move || {
                let code = file(&worker, &format!("Case {t}"));
                worker.assign(&code, "crm-a", "lead").unwrap();
                worker.resolve(&code, "crm-a", None).unwrap();
                code
            })
        })
        .collect();
    let mut codes: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    codes.sort();
    codes.dedup();
    assert_eq!(codes.len(), THREADS);

    for code in &codes {
        let c = desk.get(code).unwrap();
        assert_eq!(c.status(), Status::Resolved);
        assert_eq!(c.timeline().len(), 3);
    }
    assert_eq!(desk.store().agent_open_workload("crm-a").unwrap(), 0);
    assert_eq!(desk.store().agent_assigned_set("crm-a").unwrap().len(), THREADS);
}
