//! Property tests for rule evaluation and log filtering.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use ucon_core::event_log::{Attribute, Event, Trace};
use ucon_core::{
    filter_log, validate_log_access_at, validate_output_access_at, validate_processing,
    AllowedTechnique, AttributeExclusionRules, EventLog, LogUsageRules, OutputRules,
    PathSegmentSanitizer, Policy, ProcessingRules, RuleScope, Sanitizer, SemanticLogConstraints,
    Tainted, TimeRange, ViolationKind,
};

const ACTIVITIES: [&str; 6] = ["Register", "Triage", "Diagnosis", "Treat", "Cancel", "Discharge"];

fn policy(authorized: Vec<String>) -> Policy {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    Policy {
        log_file: "log.xes".into(),
        log_usage_rules: LogUsageRules {
            log_expiration: Some(now + Duration::days(365)),
            max_access_count: 10,
            allowed_locations: vec!["it".into()],
            access_control_rules: authorized.clone(),
            ..LogUsageRules::default()
        },
        output_rules: OutputRules {
            output_expiration: Some(now + Duration::days(365)),
            max_access_count: 10,
            allowed_locations: vec!["it".into()],
            access_control_rules: authorized.clone(),
            ..OutputRules::default()
        },
        processing_rules: ProcessingRules {
            access_control_rules: authorized,
            allowed_techniques: vec![AllowedTechnique::new("AutomatedDiscovery", "HeuristicMiner")],
            allowed_locations: vec!["it".into()],
        },
        last_updated: now,
    }
}

fn arb_event() -> impl Strategy<Value = Event> {
    (0..ACTIVITIES.len(), 2023i32..2026, 1u32..13, prop::bool::ANY).prop_map(
        |(activity, year, month, with_date)| {
            let mut attributes = vec![Attribute::string("concept:name", ACTIVITIES[activity])];
            if with_date {
                attributes.push(Attribute::date(
                    "time:timestamp",
                    format!("{}-{:02}-15T12:00:00Z", year, month),
                ));
            }
            Event::new(attributes)
        },
    )
}

fn arb_log() -> impl Strategy<Value = EventLog> {
    prop::collection::vec(prop::collection::vec(arb_event(), 0..8), 0..8).prop_map(|traces| EventLog {
        traces: traces
            .into_iter()
            .enumerate()
            .map(|(i, events)| Trace {
                attributes: vec![Attribute::string("concept:name", format!("case-{}", i))],
                events,
            })
            .collect(),
    })
}

fn arb_subset() -> impl Strategy<Value = Vec<String>> {
    prop::sample::subsequence(ACTIVITIES.to_vec(), 0..4)
        .prop_map(|v| v.into_iter().map(String::from).collect())
}

fn arb_rules() -> impl Strategy<Value = LogUsageRules> {
    (arb_subset(), arb_subset(), arb_subset(), prop::bool::ANY).prop_map(
        |(excluded, include, exclude, windowed)| LogUsageRules {
            attribute_exclusion_rules: AttributeExclusionRules {
                scope: "event".into(),
                event_attribute: "concept:name".into(),
                excluded_attributes: excluded,
            },
            allowed_time_range: TimeRange {
                event_attribute: "time:timestamp".into(),
                start_date: windowed.then(|| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                end_date: windowed.then(|| Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap()),
            },
            semantic_log_constraints: SemanticLogConstraints {
                event_attribute: "concept:name".into(),
                must_include: include,
                must_exclude: exclude,
            },
            ..LogUsageRules::default()
        },
    )
}

proptest! {
    /// Property: principals outside the access-control list are always denied
    ///
    /// Every other field of the request is valid, so the only possible
    /// failure is the authorization check, and it must be reported as such.
    #[test]
    fn proptest_unauthorized_principals_always_denied(
        authorized in prop::collection::vec("[a-z]{3,8}", 0..5),
        principal in "[a-z]{3,8}",
    ) {
        prop_assume!(!authorized.iter().any(|a| a.eq_ignore_ascii_case(&principal)));
        let p = policy(authorized);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let err = validate_log_access_at(&principal, "it", &p, now).unwrap_err();
        prop_assert_eq!(err.kind, ViolationKind::NotAuthorized { scope: RuleScope::Log });

        let err = validate_output_access_at(&principal, "it", &p, now).unwrap_err();
        prop_assert_eq!(err.kind, ViolationKind::NotAuthorized { scope: RuleScope::Output });

        let err = validate_processing(&principal, "it", "HeuristicMiner", "AutomatedDiscovery", &p)
            .unwrap_err();
        prop_assert_eq!(err.kind, ViolationKind::NotAuthorized { scope: RuleScope::Processing });
    }

    /// Property: listed principals pass regardless of case
    #[test]
    fn proptest_authorized_principals_admitted_ignoring_case(
        authorized in prop::collection::vec("[a-z]{3,8}", 1..5),
        pick in any::<prop::sample::Index>(),
    ) {
        let principal = pick.get(&authorized).to_ascii_uppercase();
        let p = policy(authorized);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        prop_assert!(validate_log_access_at(&principal, "IT", &p, now).is_ok());
    }

    /// Property: filtering an already-filtered log changes nothing
    #[test]
    fn proptest_filter_is_idempotent(log in arb_log(), rules in arb_rules()) {
        let once = filter_log(&log, &rules);
        let twice = filter_log(&EventLog::from(&once), &rules);
        prop_assert_eq!(once, twice);
    }

    /// Property: surviving traces satisfy the semantic constraints
    ///
    /// Each kept trace is non-empty, hits `mustInclude`, avoids `mustExclude`
    /// and `excludedAttributes`, and keeps its events in source order.
    #[test]
    fn proptest_surviving_traces_satisfy_constraints(log in arb_log(), rules in arb_rules()) {
        let filtered = filter_log(&log, &rules);
        prop_assert!(filtered.traces.len() <= log.traces.len());

        let semantic = &rules.semantic_log_constraints;
        for trace in &filtered.traces {
            let names: Vec<String> = trace
                .events
                .iter()
                .map(|e| e.attributes[0].value.clone())
                .collect();
            prop_assert!(!names.is_empty());
            prop_assert!(names.iter().any(|n| semantic.must_include.contains(n)));
            prop_assert!(!names.iter().any(|n| semantic.must_exclude.contains(n)));
            prop_assert!(!names
                .iter()
                .any(|n| rules.attribute_exclusion_rules.excluded_attributes.contains(n)));

            let source = log
                .traces
                .iter()
                .find(|t| t.attributes == trace.attributes)
                .expect("surviving trace comes from the source log");
            let mut source_events = source.events.iter();
            for kept in &trace.events {
                prop_assert!(source_events.any(|e| e.attributes == kept.attributes));
            }
        }
    }

    /// Property: the path-segment sanitizer never lets a separator or
    /// traversal component through
    #[test]
    fn proptest_sanitizer_rejects_path_escapes(
        prefix in "[a-zA-Z0-9._-]{0,10}",
        sep in prop_oneof![Just("/"), Just("\\"), Just("\n"), Just("\0")],
        suffix in "[a-zA-Z0-9._-]{0,10}",
    ) {
        let sanitizer = PathSegmentSanitizer::default();
        let input = format!("{}{}{}", prefix, sep, suffix);
        prop_assert!(sanitizer.sanitize("config_id", Tainted::new(input)).is_err());
        prop_assert!(sanitizer.sanitize("config_id", Tainted::new("..".to_string())).is_err());
    }
}
