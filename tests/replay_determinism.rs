//! Record once, replay many: outbound calls answered from a context.

use scenario::prelude::*;
use scenario::replay::{CallSignature, ContextArchive};
use scenario::state::ExecOutput;
use serde_json::json;
use test_log::test;

fn workload_state() -> State {
    State::new()
        .with_leadership(true)
        .with_config("channel", "stable")
        .with_containers([container("workload").with_can_connect(true).with_exec(
            ["version"],
            ExecOutput {
                stdout: "1.4.2".to_string(),
                ..ExecOutput::default()
            },
        )])
}

/// Reads its version from the workload and reports it.
fn version_unit(_: &DispatchedEvent, tools: &mut HookTools<'_>) -> UnitResult {
    let config = tools.config_get()?;
    let output = tools.exec("workload", &["version"])?;
    tools.application_version_set(&output.stdout)?;
    tools.juju_log("INFO", &format!("channel {:?}", config.get("channel")))?;
    tools.status_set(StatusKind::Active, "", false)?;
    Ok(())
}

// H0: Replaying a recorded context yields a different output state
// Falsification: record one dispatch, replay it against the same input
#[test]
fn h0_replay_reproduces_recorded_run() {
    let runtime = Runtime::new(UnitSpec::named("app"));
    let input = workload_state();

    let mut recording = Context::new(input.clone());
    let recorded = runtime
        .dispatch(Event::new("update-status"), input.clone(), &mut version_unit, &mut recording)
        .unwrap();

    let mut replaying = recording.rewound();
    let replayed = runtime
        .dispatch(Event::new("update-status"), input, &mut version_unit, &mut replaying)
        .unwrap();

    assert_eq!(recorded, replayed);
    assert_eq!(recorded.status.app_version, "1.4.2");
    for memo in replaying.memos.values() {
        assert_eq!(memo.remaining(), 0);
    }
}

// H0: Replay answers come from the live state, not the recording
// Falsification: change the state between record and replay
#[test]
fn h0_replay_answers_from_recording() {
    let runtime = Runtime::new(UnitSpec::named("app"));
    let mut recording = Context::new(State::new());
    let mut leader_seen = Vec::new();
    let mut unit = |_: &DispatchedEvent, tools: &mut HookTools<'_>| -> UnitResult {
        leader_seen.push(tools.is_leader()?);
        Ok(())
    };

    runtime
        .dispatch(Event::new("start"), State::new().with_leadership(true), &mut unit, &mut recording)
        .unwrap();
    let mut replaying = recording.rewound();
    runtime
        .dispatch(Event::new("start"), State::new().with_leadership(false), &mut unit, &mut replaying)
        .unwrap();

    assert_eq!(leader_seen, vec![true, true]);
}

#[test]
fn strict_replay_rejects_reordered_calls() {
    let runtime = Runtime::new(UnitSpec::named("app"));
    let memo = Memo::from_calls(
        [(CallSignature::new([json!("db")]), json!([1]))],
        CachingPolicy::Strict,
    );
    let mut context = Context::default()
        .with_mode(CallMode::Replay)
        .with_memo("relation-ids", memo);

    let mut unit = |_: &DispatchedEvent, tools: &mut HookTools<'_>| -> UnitResult {
        tools.relation_ids("cache")?;
        Ok(())
    };
    let err = runtime
        .dispatch(Event::new("start"), State::new(), &mut unit, &mut context)
        .unwrap_err();
    assert!(err.is_replay_failure());
    assert_eq!(context.memos["relation-ids"].cursor, 0);
}

// H0: A failed replay leaves cursors advanced in the caller's context
// Falsification: match one call, mismatch the next, inspect every memo
#[test]
fn h0_strict_mismatch_leaves_every_memo_as_given() {
    let runtime = Runtime::new(UnitSpec::named("app"));
    let given = Context::default()
        .with_mode(CallMode::Replay)
        .with_memo(
            "is-leader",
            Memo::from_calls([(CallSignature::default(), json!(true))], CachingPolicy::Strict),
        )
        .with_memo(
            "relation-ids",
            Memo::from_calls(
                [(CallSignature::new([json!("db")]), json!([1]))],
                CachingPolicy::Strict,
            ),
        );
    let mut context = given.clone();

    let mut unit = |_: &DispatchedEvent, tools: &mut HookTools<'_>| -> UnitResult {
        assert!(tools.is_leader()?);
        tools.relation_ids("cache")?;
        Ok(())
    };
    let err = runtime
        .dispatch(Event::new("start"), State::new(), &mut unit, &mut context)
        .unwrap_err();

    assert!(matches!(err, ScenarioError::ReplayMismatch { ref call_site, .. } if call_site == "relation-ids"));
    assert_eq!(context.memos, given.memos);
    for memo in context.memos.values() {
        assert_eq!(memo.cursor, 0);
    }
    assert_eq!(context.state, given.state);
}

// H0: Cursors move backwards or skip within one execution
// Falsification: replay a recorded run and check each memo is fully consumed
#[test]
fn h0_cursors_end_at_log_length_after_replay() {
    let runtime = Runtime::new(UnitSpec::named("app"));
    let input = workload_state();
    let mut recording = Context::new(input.clone());
    runtime
        .dispatch(Event::new("install"), input.clone(), &mut version_unit, &mut recording)
        .unwrap();

    let mut replaying = recording.rewound();
    runtime
        .dispatch(Event::new("install"), input, &mut version_unit, &mut replaying)
        .unwrap();
    for (site, memo) in &replaying.memos {
        assert_eq!(memo.cursor, memo.calls.len(), "memo {site} not fully replayed");
        assert_eq!(memo.calls, recording.memos[site].calls);
    }
}

#[test]
fn loose_replay_falls_back_to_live_state() {
    let runtime = Runtime::new(UnitSpec::named("app"));
    let config = ScenarioConfig::builder()
        .caching_policy(CachingPolicy::Loose)
        .mode(CallMode::Replay)
        .build();
    let mut context = Context::from_config(State::new(), &config).with_memo(
        "is-leader",
        Memo::from_calls([(CallSignature::default(), json!(false))], CachingPolicy::Loose),
    );

    let mut answers = Vec::new();
    let mut unit = |_: &DispatchedEvent, tools: &mut HookTools<'_>| -> UnitResult {
        answers.push(tools.is_leader()?);
        answers.push(tools.is_leader()?);
        Ok(())
    };
    runtime
        .dispatch(Event::new("start"), State::new().with_leadership(true), &mut unit, &mut context)
        .unwrap();

    assert_eq!(answers, vec![false, true]);
    assert_eq!(context.memos["is-leader"].calls.len(), 1);
}

#[test]
fn archive_survives_disk_round_trip() {
    let runtime = Runtime::new(UnitSpec::named("app"));
    let input = workload_state();
    let mut recording = Context::new(input.clone());
    runtime
        .dispatch(Event::new("install"), input, &mut version_unit, &mut recording)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("context.zst");
    let config = ScenarioConfig::builder().compression_level(9).build();
    ContextArchive::from_config(&recording, &config)
        .unwrap()
        .save(&path)
        .unwrap();

    let restored = ContextArchive::load(&path).unwrap().restore().unwrap();
    assert_eq!(restored.memos, recording.memos);
    assert_eq!(restored.state, recording.state);
}

#[test]
fn corrupted_archive_is_rejected() {
    let archive = ContextArchive::create(&Context::new(workload_state()), 3).unwrap();
    let mut tampered = archive.clone();
    if let Some(byte) = tampered.data.first_mut() {
        *byte ^= 0xff;
    }
    assert!(matches!(tampered.restore(), Err(ScenarioError::ArchiveIntegrity)));
    assert!(archive.restore().is_ok());
}

#[test]
fn context_dict_round_trip_keeps_memos() {
    let runtime = Runtime::new(UnitSpec::named("app"));
    let input = workload_state();
    let mut recording = Context::new(input.clone());
    runtime
        .dispatch(Event::new("install"), input, &mut version_unit, &mut recording)
        .unwrap();

    let dict = recording.to_dict().unwrap();
    assert!(dict["memos"]["exec"]["calls"].is_array());
    let restored = Context::from_dict(dict).unwrap();
    assert_eq!(restored.memos, recording.memos);
    assert_eq!(restored.state, recording.state);
}
