//! Lifecycle state machine tests: transitions, timeline, SLA latch.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use ticketdesk_core::{
    assignment::Agent,
    clock::{Clock, ManualClock},
    complaint::{ComplaintUpdate, Department, NewComplaint, NewReporter, Priority, Status},
    config::DeskConfig,
    lifecycle::ComplaintLifecycle,
    rng::{is_ticket_code, TicketCodeGenerator},
    store::DeskStore,
    timeline::TimelineAction,
    types::Timestamp,
    DeskError,
};

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn desk() -> (ComplaintLifecycle, Arc<ManualClock>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = Arc::new(ManualClock::new(t0()));
    let desk = ComplaintLifecycle::build_test(clock.clone()).unwrap();
    desk.assignment()
        .register_agent(
            desk.store(),
            &Agent {
                agent_id: "agt-crm-01".into(),
                name: "Meera Nair".into(),
                email: "meera.nair@utility.example".into(),
                department: Department::Crm,
                is_active: true,
            },
        )
        .unwrap();
    (desk, clock)
}

fn intake(title: &str, description: &str) -> NewComplaint {
    NewComplaint {
        title: title.into(),
        description: description.into(),
        department: "CRM".into(),
        category: "Billing".into(),
        reported_by: NewReporter {
            name: "Ravi Kumar".into(),
            email: "ravi@example.com".into(),
            ..NewReporter::default()
        },
        ..NewComplaint::default()
    }
}

fn file(desk: &ComplaintLifecycle) -> String {
    desk.create(intake("Bill too high", "Charged twice this month"))
        .unwrap()
        .complaint_id()
        .to_string()
}

/// A new complaint is pending, carries one `created` entry and medium-tier deadlines.
#[test]
fn create_starts_pending_with_created_entry() {
    let (desk, _) = desk();
    let c = desk.create(intake("Bill too high", "Charged twice this month")).unwrap();

    assert!(is_ticket_code(c.complaint_id()), "bad code {}", c.complaint_id());
    assert_eq!(c.status(), Status::Pending);
    assert_eq!(c.priority(), Priority::Medium);
    assert_eq!(c.timeline().len(), 1);
    assert_eq!(c.timeline().entries()[0].action, TimelineAction::Created);
    assert_eq!(c.sla().response_deadline, t0() + Duration::hours(8));
    assert_eq!(c.sla().resolution_deadline, t0() + Duration::hours(72));
    assert!(!c.sla().is_breached);
    assert_eq!(c.reported_by().email, "ravi@example.com");
}

/// Urgent keywords in the text raise the tier and shrink the budgets.
#[test]
fn emergency_text_files_as_critical() {
    let (desk, _) = desk();
    let c = desk
        .create(intake("Gas smell", "This is an emergency near the meter"))
        .unwrap();
    assert_eq!(c.priority(), Priority::Critical);
    assert_eq!(c.sla().response_budget_hours, 1);
    assert_eq!(c.sla().resolution_budget_hours, 4);
}

#[test]
fn explicit_low_priority_is_honoured() {
    let (desk, _) = desk();
    let mut new = intake("Leaflet typo", "Minor spelling mistake");
    new.priority = Some(Priority::Low);
    let c = desk.create(new).unwrap();
    assert_eq!(c.priority(), Priority::Low);
    assert_eq!(c.sla().resolution_deadline, t0() + Duration::hours(168));
}

#[test]
fn create_rejects_malformed_intake() {
    let (desk, _) = desk();

    let missing_title = intake("   ", "text");
    assert!(matches!(desk.create(missing_title), Err(DeskError::Validation(_))));

    let mut bad_email = intake("Title", "text");
    bad_email.reported_by.email = "not-an-email".into();
    assert!(matches!(desk.create(bad_email), Err(DeskError::Validation(_))));

    let mut bad_dept = intake("Title", "text");
    bad_dept.department = "HR".into();
    assert!(matches!(desk.create(bad_dept), Err(DeskError::Validation(_))));
}

/// Resolution needs work first: pending -> resolved is not an edge.
#[test]
fn pending_cannot_be_resolved_directly() {
    let (desk, _) = desk();
    let code = file(&desk);

    let err = desk.resolve(&code, "mgr-1", None).unwrap_err();
    assert!(
        matches!(err, DeskError::InvalidTransition { from: Status::Pending, to: Status::Resolved }),
        "unexpected error: {err}"
    );
    let err = desk.set_status(&code, Status::Resolved, "mgr-1").unwrap_err();
    assert!(matches!(err, DeskError::InvalidTransition { .. }));

    // Nothing was written.
    assert_eq!(desk.get(&code).unwrap().timeline().len(), 1);
}

/// The second resolve hits resolved -> resolved and writes nothing.
#[test]
fn resolving_twice_fails_the_second_time() {
    let (desk, clock) = desk();
    let code = file(&desk);
    desk.assign(&code, "agt-crm-01", "mgr-1").unwrap();
    clock.advance_hours(5);

    let resolved = desk.resolve(&code, "agt-crm-01", Some("Refund issued")).unwrap();
    assert_eq!(resolved.status(), Status::Resolved);
    let resolution = resolved.resolution().unwrap();
    assert_eq!(resolution.resolved_by, "agt-crm-01");
    assert_eq!(resolution.resolved_at, t0() + Duration::hours(5));
    assert_eq!(resolution.resolution_note.as_deref(), Some("Refund issued"));

    let err = desk.resolve(&code, "agt-crm-01", None).unwrap_err();
    assert!(matches!(
        err,
        DeskError::InvalidTransition { from: Status::Resolved, to: Status::Resolved }
    ));
    assert_eq!(desk.get(&code).unwrap().timeline().len(), 3);
}

#[test]
fn set_status_resolved_fills_resolution_block() {
    let (desk, clock) = desk();
    let code = file(&desk);
    desk.assign(&code, "agt-crm-01", "mgr-1").unwrap();
    clock.advance_hours(2);

    let c = desk.set_status(&code, Status::Resolved, "mgr-1").unwrap();
    let resolution = c.resolution().expect("resolved complaint must carry a resolution");
    assert_eq!(resolution.resolved_by, "mgr-1");
    assert_eq!(resolution.resolved_at, clock.now());
    assert_eq!(resolution.resolution_note, None);

    let last = c.timeline().last().unwrap();
    assert_eq!(last.action, TimelineAction::StatusChanged);
    assert!(last.details.contains("resolved"), "details: {}", last.details);
}

/// Escalation bumps priority but the deadlines stay at the filing tier.
#[test]
fn escalating_low_complaint_keeps_original_deadline() {
    let (desk, _) = desk();
    let mut new = intake("Leaflet typo", "Minor spelling mistake");
    new.priority = Some(Priority::Low);
    let code = desk.create(new).unwrap().complaint_id().to_string();

    let c = desk.escalate(&code, "mgr-1", Some("Customer called three times")).unwrap();
    assert_eq!(c.status(), Status::Escalated);
    assert_eq!(c.priority(), Priority::Critical);
    assert_eq!(c.sla().resolution_deadline, t0() + Duration::hours(168));
    assert_eq!(c.sla().resolution_budget_hours, 168);

    // The critical 4h budget does not apply: still inside the low-tier window.
    assert!(!desk.check_sla(&code, t0() + Duration::hours(100)).unwrap());
    assert!(desk.check_sla(&code, t0() + Duration::hours(169)).unwrap());
}

/// The breach flag flips once and later checks do not add entries.
#[test]
fn breach_flag_latches_and_is_recorded_once() {
    let (desk, _) = desk();
    let code = file(&desk);
    let deadline = desk.get(&code).unwrap().sla().resolution_deadline;

    assert!(!desk.check_sla(&code, deadline).unwrap(), "deadline itself is not past");
    assert_eq!(desk.get(&code).unwrap().timeline().len(), 1);

    assert!(desk.check_sla(&code, deadline + Duration::minutes(1)).unwrap());
    assert!(desk.check_sla(&code, deadline + Duration::hours(10)).unwrap());

    let c = desk.get(&code).unwrap();
    assert!(c.sla().is_breached);
    let breaches = c
        .timeline()
        .iter()
        .filter(|e| e.action == TimelineAction::SlaBreached)
        .count();
    assert_eq!(breaches, 1);
}

/// Closed complaints accept no transitions, comments or attachments.
#[test]
fn closed_is_terminal() {
    let (desk, _) = desk();
    let code = file(&desk);
    desk.assign(&code, "agt-crm-01", "mgr-1").unwrap();
    desk.resolve(&code, "agt-crm-01", None).unwrap();
    let closed = desk.set_status(&code, Status::Closed, "mgr-1").unwrap();
    assert!(closed.resolution().is_some(), "closing keeps the resolution block");

    assert!(matches!(desk.add_comment(&code, "mgr-1", "late note"), Err(DeskError::InvalidState(_))));
    assert!(matches!(
        desk.add_attachment(&code, "mgr-1", "a.pdf", "https://files/a.pdf"),
        Err(DeskError::InvalidState(_))
    ));
    assert!(matches!(desk.escalate(&code, "mgr-1", None), Err(DeskError::InvalidTransition { .. })));
    assert!(matches!(
        desk.set_status(&code, Status::InProgress, "mgr-1"),
        Err(DeskError::InvalidTransition { .. })
    ));
    assert!(matches!(
        desk.assign(&code, "agt-crm-01", "mgr-1"),
        Err(DeskError::InvalidTransition { .. })
    ));
}

#[test]
fn rating_requires_resolved_and_range() {
    let (desk, _) = desk();
    let code = file(&desk);
    assert!(matches!(desk.rate(&code, 4), Err(DeskError::InvalidState(_))));

    desk.assign(&code, "agt-crm-01", "mgr-1").unwrap();
    desk.resolve(&code, "agt-crm-01", None).unwrap();
    assert!(matches!(desk.rate(&code, 0), Err(DeskError::Validation(_))));
    assert!(matches!(desk.rate(&code, 6), Err(DeskError::Validation(_))));

    let c = desk.rate(&code, 4).unwrap();
    assert_eq!(c.satisfaction_rating(), Some(4));
    assert_eq!(c.timeline().last().unwrap().action, TimelineAction::Rated);
}

/// Timeline length tracks the number of successful operations exactly.
#[test]
fn every_operation_appends_exactly_one_entry() {
    let (desk, clock) = desk();
    let code = file(&desk);
    let grows_to = |n: usize| {
        let len = desk.get(&code).unwrap().timeline().len();
        assert_eq!(len, n, "Expected {n} timeline entries, got {len}");
        clock.advance_hours(1);
    };

    desk.add_comment(&code, "agt-crm-01", "Looking into it").unwrap();
    grows_to(2);
    desk.escalate(&code, "mgr-1", None).unwrap();
    grows_to(3);
    desk.assign(&code, "agt-crm-01", "mgr-1").unwrap();
    grows_to(4);
    desk.add_attachment(&code, "agt-crm-01", "bill.pdf", "https://files/bill.pdf").unwrap();
    grows_to(5);
    desk.update_details(
        &code,
        "agt-crm-01",
        ComplaintUpdate { tags: Some(vec!["refund".into()]), ..ComplaintUpdate::default() },
    )
    .unwrap();
    grows_to(6);
    desk.resolve(&code, "agt-crm-01", Some("Credited")).unwrap();
    grows_to(7);
    desk.rate(&code, 5).unwrap();
    grows_to(8);
    desk.set_status(&code, Status::Closed, "mgr-1").unwrap();
    grows_to(9);

    let actions: Vec<_> = desk.get(&code).unwrap().timeline().iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            TimelineAction::Created,
            TimelineAction::CommentAdded,
            TimelineAction::Escalated,
            TimelineAction::Assigned,
            TimelineAction::AttachmentAdded,
            TimelineAction::Updated,
            TimelineAction::Resolved,
            TimelineAction::Rated,
            TimelineAction::StatusChanged,
        ]
    );
}

/// Reopening a resolved complaint depends on `allow_reopen`.
#[test]
fn reopen_is_off_unless_configured() {
    let (desk, _) = desk();
    let code = file(&desk);
    desk.assign(&code, "agt-crm-01", "mgr-1").unwrap();
    desk.resolve(&code, "agt-crm-01", None).unwrap();
    assert!(matches!(
        desk.set_status(&code, Status::InProgress, "mgr-1"),
        Err(DeskError::InvalidTransition { from: Status::Resolved, to: Status::InProgress })
    ));

    let clock = Arc::new(ManualClock::new(t0()));
    let store = DeskStore::in_memory().unwrap();
    store.migrate().unwrap();
    let mut config = DeskConfig::default_test();
    config.lifecycle.allow_reopen = true;
    let lenient = ComplaintLifecycle::new(store, &config, clock, Arc::new(TicketCodeGenerator::seeded(9)));
    lenient
        .assignment()
        .register_agent(
            lenient.store(),
            &Agent {
                agent_id: "agt-it-01".into(),
                name: "Tom Das".into(),
                email: "tom@utility.example".into(),
                department: Department::It,
                is_active: true,
            },
        )
        .unwrap();

    let code = lenient.create(intake("Portal down", "Cannot log in")).unwrap().complaint_id().to_string();
    lenient.assign(&code, "agt-it-01", "mgr-1").unwrap();
    lenient.resolve(&code, "agt-it-01", None).unwrap();
    let reopened = lenient.set_status(&code, Status::InProgress, "mgr-1").unwrap();
    assert_eq!(reopened.status(), Status::InProgress);
    assert!(reopened.resolution().is_none());
}

#[test]
fn update_details_edits_description_fields_only() {
    let (desk, _) = desk();
    let code = file(&desk);

    let c = desk
        .update_details(
            &code,
            "agt-crm-01",
            ComplaintUpdate {
                title: Some("Bill doubled in March".into()),
                category: Some("Service Quality".into()),
                ..ComplaintUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(c.title(), "Bill doubled in March");
    assert_eq!(c.category().label(), "Service Quality");
    assert_eq!(c.status(), Status::Pending);
    assert_eq!(c.priority(), Priority::Medium);

    assert!(matches!(
        desk.update_details(&code, "agt-crm-01", ComplaintUpdate::default()),
        Err(DeskError::Validation(_))
    ));
    assert!(matches!(
        desk.update_details(
            &code,
            "agt-crm-01",
            ComplaintUpdate { category: Some("Weather".into()), ..ComplaintUpdate::default() }
        ),
        Err(DeskError::Validation(_))
    ));
}

#[test]
fn comments_need_text_and_keep_order() {
    let (desk, _) = desk();
    let code = file(&desk);
    assert!(matches!(desk.add_comment(&code, "a", "  "), Err(DeskError::Validation(_))));

    desk.add_comment(&code, "a", "first").unwrap();
    desk.add_comment(&code, "b", "second").unwrap();
    let c = desk.get(&code).unwrap();
    let texts: Vec<_> = c.comments().iter().map(|c| c.comment.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);
    assert_eq!(c.comments()[1].user, "b");
}

/// The sweep flips overdue complaints only, and only once.
#[test]
fn sweep_flags_only_overdue_open_complaints() {
    let (desk, _) = desk();
    let critical = desk
        .create(intake("Outage", "Urgent: no power on the street"))
        .unwrap()
        .complaint_id()
        .to_string();
    let medium = file(&desk);

    let flipped = desk.sweep_sla_breaches(t0() + Duration::hours(5)).unwrap();
    assert_eq!(flipped, vec![critical.clone()]);
    assert!(desk.sweep_sla_breaches(t0() + Duration::hours(6)).unwrap().is_empty());
    assert!(!desk.get(&medium).unwrap().sla().is_breached);
}

/// Unknown complaint or agent ids are `NotFound`, and the failed
/// assignment leaves the complaint exactly as it was.
#[test]
fn unknown_ids_are_not_found() {
    let (desk, _) = desk();
    assert!(matches!(desk.get("CMP-00000000"), Err(DeskError::NotFound { .. })));

    let code = file(&desk);
    let err = desk.assign(&code, "agt-nobody", "mgr-1").unwrap_err();
    assert!(matches!(err, DeskError::NotFound { entity: "Agent", .. }), "got {err}");

    let c = desk.get(&code).unwrap();
    assert_eq!(c.status(), Status::Pending, "failed assign must not move the complaint");
    assert_eq!(c.timeline().len(), 1);
    assert_eq!(c.assigned_to(), None);
}

/// A second connection to an in-memory desk sees the same data, and its
/// writes are visible back on the first.
#[test]
fn reopened_in_memory_desk_shares_data() {
    let (first, _) = desk();
    let code = file(&first);

    let worker = first.reopen().unwrap();
    let seen = worker.get(&code).unwrap();
    assert_eq!(seen.complaint_id(), code);
    assert_eq!(seen.status(), Status::Pending);

    worker.add_comment(&code, "mgr-1", "Picked up on another thread").unwrap();
    assert_eq!(first.get(&code).unwrap().comments().len(), 1);

    let (other, _) = desk();
    assert!(
        matches!(other.get(&code), Err(DeskError::NotFound { .. })),
        "separate in-memory desks must not share data"
    );
}
