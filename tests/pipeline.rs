// tests/pipeline.rs

//! Build pipeline tests: caching, invalidation, forcing and failure handling.

mod common;

use common::Workspace;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use xyz::sandbox::CancelToken;
use xyz::{
    BuildOptions, BuildStateStore, Error, Kitchen, Stage, StageStatus, TargetId, TargetState,
    resolve,
};

/// gmp <- mpfr <- gcc, plus an unrelated m4
fn toolchain(ws: &Workspace) {
    ws.register(ws.rule("gmp").file("%(host)s/lib/libgmp.a", "gmp"));
    ws.register(
        ws.rule("mpfr")
            .depends_on("gmp")
            .file("%(host)s/lib/libmpfr.a", "mpfr"),
    );
    ws.register(
        ws.rule("gcc")
            .depends_on("mpfr")
            .file("%(host)s/bin/gcc", "gcc"),
    );
    ws.register(ws.rule("m4").file("%(host)s/bin/m4", "m4"));
}

fn executed(report: &xyz::BuildReport, target: &str) -> Vec<Stage> {
    report
        .get(&target.parse::<TargetId>().unwrap())
        .unwrap()
        .executed
        .clone()
}

fn all_stages() -> Vec<Stage> {
    Stage::ALL.to_vec()
}

#[test]
fn test_first_build_runs_every_stage() {
    let ws = Workspace::new();
    toolchain(&ws);

    let report = ws.build(&["gcc"]);
    assert!(report.success());
    assert_eq!(report.outcomes.len(), 3);
    for target in ["gmp", "mpfr", "gcc"] {
        assert_eq!(executed(&report, target), all_stages(), "{}", target);
        assert!(ws.paths(target).archive.is_file());
        assert!(ws.paths(target).manifest.is_file());
    }

    // Dependencies finish before their dependents start
    let journal = ws.take_journal();
    let first = |target: &str| journal.iter().position(|(t, _)| t == target).unwrap();
    let last = |target: &str| journal.iter().rposition(|(t, _)| t == target).unwrap();
    assert!(last("gmp") < first("mpfr"));
    assert!(last("mpfr") < first("gcc"));
}

#[test]
fn test_second_build_runs_nothing() {
    let ws = Workspace::new();
    toolchain(&ws);

    let first = ws.build(&["gcc", "m4"]);
    assert!(first.success());
    let archive = fs::read(ws.paths("gcc").archive).unwrap();
    ws.take_journal();

    let second = ws.build(&["gcc", "m4"]);
    assert!(second.success());
    assert_eq!(second.executed_stages(), 0);
    assert!(ws.take_journal().is_empty());
    for outcome in &second.outcomes {
        assert_eq!(outcome.skipped, all_stages());
        assert_eq!(outcome.state, TargetState::Released);
    }
    assert_eq!(fs::read(ws.paths("gcc").archive).unwrap(), archive);
}

#[test]
fn test_rule_change_reruns_stage_and_dependents() {
    let ws = Workspace::new();
    toolchain(&ws);
    assert!(ws.build(&["gcc", "m4"]).success());

    ws.register(
        ws.rule("gmp")
            .file("%(host)s/lib/libgmp.a", "gmp")
            .revised(Stage::Configure, "--enable-cxx"),
    );
    let report = ws.build(&["gcc", "m4"]);
    assert!(report.success());

    assert_eq!(executed(&report, "gmp"), Stage::Configure.and_later().collect::<Vec<_>>());
    let from_prepare: Vec<Stage> = Stage::PrepareDependencies.and_later().collect();
    assert_eq!(executed(&report, "mpfr"), from_prepare);
    assert_eq!(executed(&report, "gcc"), from_prepare);
    assert!(executed(&report, "m4").is_empty());
}

#[test]
fn test_changed_release_content_reaches_dependents() {
    let ws = Workspace::new();
    toolchain(&ws);
    assert!(ws.build(&["mpfr"]).success());

    ws.register(ws.rule("gmp").file("%(host)s/lib/libgmp.a", "gmp 6.3"));
    let report = ws.build(&["mpfr"]);

    assert_eq!(executed(&report, "gmp"), Stage::Install.and_later().collect::<Vec<_>>());
    assert_eq!(
        executed(&report, "mpfr"),
        Stage::PrepareDependencies.and_later().collect::<Vec<_>>()
    );
    let view = ws.paths("mpfr").devtree_dir;
    assert_eq!(
        fs::read_to_string(view.join(common::TRIPLE).join("lib/libgmp.a")).unwrap(),
        "gmp 6.3"
    );
}

#[test]
fn test_missing_output_reruns_stage() {
    let ws = Workspace::new();
    toolchain(&ws);
    assert!(ws.build(&["mpfr"]).success());

    fs::remove_dir_all(ws.paths("gmp").install_dir).unwrap();
    let report = ws.build(&["mpfr"]);

    assert_eq!(executed(&report, "gmp"), Stage::Install.and_later().collect::<Vec<_>>());
    // Same content, same archive: mpfr has nothing to redo
    assert!(executed(&report, "mpfr").is_empty());
}

#[test]
fn test_force_rebuilds_requested_target() {
    let ws = Workspace::new();
    toolchain(&ws);
    assert!(ws.build(&["mpfr"]).success());
    ws.take_journal();

    let options = BuildOptions {
        force: true,
        ..Default::default()
    };
    let report = ws.build_with(&["mpfr"], options);
    assert!(report.success());
    assert_eq!(executed(&report, "mpfr"), all_stages());
    assert!(executed(&report, "gmp").is_empty());

    // The source is checked out again
    let journal = ws.take_journal();
    assert!(journal.contains(&("mpfr".to_string(), Stage::Fetch)));
}

#[test]
fn test_force_recursive_rebuilds_dependencies() {
    let ws = Workspace::new();
    toolchain(&ws);
    assert!(ws.build(&["mpfr"]).success());

    let options = BuildOptions {
        force_recursive: true,
        ..Default::default()
    };
    let report = ws.build_with(&["mpfr"], options);
    assert!(report.success());
    assert_eq!(executed(&report, "gmp"), all_stages());
    assert_eq!(executed(&report, "mpfr"), all_stages());
}

#[test]
fn test_reconfigure_keeps_source() {
    let ws = Workspace::new();
    toolchain(&ws);
    assert!(ws.build(&["gmp"]).success());
    ws.take_journal();

    let options = BuildOptions {
        reconfigure: true,
        ..Default::default()
    };
    let report = ws.build_with(&["gmp"], options);
    assert_eq!(executed(&report, "gmp"), Stage::Configure.and_later().collect::<Vec<_>>());
    assert_eq!(report.get(&TargetId::new("gmp")).unwrap().skipped.len(), 2);
    assert!(!ws.take_journal().iter().any(|(_, stage)| *stage == Stage::Fetch));
}

#[test]
fn test_failure_spares_unrelated_targets() {
    let ws = Workspace::with_workers(2);
    toolchain(&ws);
    ws.register(
        ws.rule("gmp")
            .file("%(host)s/lib/libgmp.a", "gmp")
            .fail_at(Stage::Build),
    );

    let report = ws.build(&["gcc", "m4"]);
    assert!(!report.success());

    let gmp = report.get(&TargetId::new("gmp")).unwrap();
    assert_eq!(gmp.state, TargetState::Failed);
    assert!(matches!(
        gmp.error,
        Some(Error::StageExecution {
            stage: Stage::Build,
            ..
        })
    ));

    for target in ["mpfr", "gcc"] {
        let outcome = report.get(&TargetId::new(target)).unwrap();
        assert_eq!(outcome.state, TargetState::Failed);
        assert_eq!(outcome.blocked_by, Some(TargetId::new("gmp")));
        assert!(outcome.executed.is_empty());
        assert_eq!(outcome.failure().unwrap(), "dependency gmp failed");
    }
    assert_eq!(report.get(&TargetId::new("m4")).unwrap().state, TargetState::Released);

    let journal = ws.take_journal();
    assert!(Workspace::stages_run(&journal, "mpfr").is_empty());
    assert!(Workspace::stages_run(&journal, "gcc").is_empty());
    assert!(ws.paths("m4").archive.is_file());
    assert!(!ws.paths("gmp").archive.exists());
}

#[test]
fn test_fixed_failure_resumes_at_failed_stage() {
    let ws = Workspace::new();
    toolchain(&ws);
    ws.register(
        ws.rule("gmp")
            .file("%(host)s/lib/libgmp.a", "gmp")
            .fail_at(Stage::Build),
    );
    assert!(!ws.build(&["mpfr"]).success());

    // Same digests, no longer failing
    ws.register(ws.rule("gmp").file("%(host)s/lib/libgmp.a", "gmp"));
    let report = ws.build(&["mpfr"]);
    assert!(report.success());
    assert_eq!(executed(&report, "gmp"), Stage::Build.and_later().collect::<Vec<_>>());
    assert_eq!(executed(&report, "mpfr"), all_stages());
}

#[test]
fn test_cycle_is_rejected_before_building() {
    let ws = Workspace::new();
    ws.register(ws.rule("a").depends_on("b"));
    ws.register(ws.rule("b").depends_on("c"));
    ws.register(ws.rule("c").depends_on("a"));

    let err = resolve(&ws.registry, &[TargetId::new("a")]).unwrap_err();
    match err {
        Error::DependencyCycle { members } => assert_eq!(members, vec!["a", "b", "c", "a"]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(ws.take_journal().is_empty());
    assert!(!ws.config.build_root().exists());
}

#[test]
fn test_interrupt_before_start_runs_nothing() {
    let ws = Workspace::new();
    toolchain(&ws);

    let plan = resolve(&ws.registry, &[TargetId::new("gcc")]).unwrap();
    let store = BuildStateStore::open(ws.config.state_file()).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let report = Kitchen::new(&ws.config, &plan, &store, BuildOptions::default(), cancel)
        .cook_all()
        .unwrap();

    assert!(report.interrupted);
    assert!(!report.success());
    assert_eq!(report.executed_stages(), 0);
    for outcome in &report.outcomes {
        assert_eq!(outcome.state, TargetState::Pending);
        assert_eq!(outcome.failure().unwrap(), "not started");
    }
}

#[test]
fn test_interrupt_during_stage_leaves_it_unrecorded() {
    let ws = Workspace::new();
    ws.register(
        ws.rule("gmp")
            .file("%(host)s/lib/libgmp.a", "gmp")
            .hang_at(Stage::Build),
    );

    let gmp = TargetId::new("gmp");
    let plan = resolve(&ws.registry, &[gmp.clone()]).unwrap();
    let store = BuildStateStore::open(ws.config.state_file()).unwrap();
    let cancel = CancelToken::new();
    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(500));
            cancel.cancel();
        })
    };

    let started = Instant::now();
    let report = Kitchen::new(&ws.config, &plan, &store, BuildOptions::default(), cancel)
        .cook_all()
        .unwrap();
    canceller.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(20));

    assert!(report.interrupted);
    let outcome = report.get(&gmp).unwrap();
    assert_eq!(outcome.state, TargetState::Failed);
    assert!(matches!(
        outcome.error,
        Some(Error::Interrupted {
            stage: Stage::Build,
            ..
        })
    ));
    assert!(store.get(&gmp, Stage::Configure).is_some());
    assert!(store.get(&gmp, Stage::Build).is_none());
    assert!(!ws.paths("gmp").archive.exists());

    // Output printed before the interrupt is kept
    let log = fs::read_to_string(ws.paths("gmp").stage_log(Stage::Build)).unwrap();
    assert!(log.contains("started"));

    // The reopened store agrees, and the next run picks up at the interrupted stage
    let reopened = BuildStateStore::open(ws.config.state_file()).unwrap();
    assert!(reopened.get(&gmp, Stage::Build).is_none());
    ws.register(ws.rule("gmp").file("%(host)s/lib/libgmp.a", "gmp"));
    ws.take_journal();
    let report = ws.build(&["gmp"]);
    assert!(report.success());
    assert_eq!(executed(&report, "gmp"), Stage::Build.and_later().collect::<Vec<_>>());
}

#[test]
fn test_variants_share_source_but_not_outputs() {
    let ws = Workspace::with_workers(2);
    ws.register(
        ws.rule("binutils")
            .variant("arm", &[("target", "arm-none-eabi")])
            .variant("avr", &[("target", "avr")])
            .file("%(host)s/bin/%(target)s-as", "as for %(target)s"),
    );

    let report = ws.build(&["binutils@arm", "binutils@avr"]);
    assert!(report.success());

    let journal = ws.take_journal();
    let fetches = journal.iter().filter(|(_, stage)| *stage == Stage::Fetch).count();
    assert_eq!(fetches, 1);

    let arm = ws.paths("binutils@arm");
    let avr = ws.paths("binutils@avr");
    assert_eq!(arm.source_dir, avr.source_dir);
    assert_ne!(arm.archive, avr.archive);

    let arm_manifest = fs::read_to_string(&arm.manifest).unwrap();
    assert!(arm_manifest.contains("bin/arm-none-eabi-as"));
    assert!(!arm_manifest.contains("bin/avr-as"));
    assert!(arm_manifest.contains("variant: arm"));

    // Losing one variant's release leaves the other cached
    fs::remove_file(&avr.archive).unwrap();
    let report = ws.build(&["binutils@arm", "binutils@avr"]);
    assert!(executed(&report, "binutils@arm").is_empty());
    assert_eq!(executed(&report, "binutils@avr"), vec![Stage::Package]);
}

#[test]
fn test_variant_must_be_named() {
    let ws = Workspace::new();
    ws.register(ws.rule("binutils").variant("arm", &[("target", "arm-none-eabi")]));

    let err = resolve(&ws.registry, &[TargetId::new("binutils")]).unwrap_err();
    assert!(matches!(err, Error::AmbiguousVariant { .. }));

    let err = resolve(&ws.registry, &[TargetId::with_variant("binutils", "mips")]).unwrap_err();
    assert!(matches!(err, Error::UnknownVariant { .. }));
}

#[test]
fn test_group_bundles_dependencies() {
    let ws = Workspace::new();
    ws.register(
        ws.rule("gcc")
            .variant("arm", &[("target", "arm-none-eabi")])
            .file("%(host)s/bin/%(target)s-gcc", "gcc"),
    );
    ws.register(ws.rule("stlink").file("%(host)s/bin/st-util", "st-util"));
    ws.register(
        ws.rule("arm-toolchain")
            .group()
            .depends_on("gcc@arm")
            .depends_on("stlink"),
    );

    let report = ws.build(&["arm-toolchain"]);
    assert!(report.success());

    let manifest = fs::read_to_string(ws.paths("arm-toolchain").manifest).unwrap();
    assert!(manifest.contains(&format!("{}/bin/arm-none-eabi-gcc", common::TRIPLE)));
    assert!(manifest.contains(&format!("{}/bin/st-util", common::TRIPLE)));
}

#[test]
fn test_preview_reports_pending_work() {
    let ws = Workspace::new();
    toolchain(&ws);

    let status = |ws: &Workspace, target: &str| {
        let plan = resolve(&ws.registry, &[TargetId::new("mpfr")]).unwrap();
        let store = BuildStateStore::open(ws.config.state_file()).unwrap();
        let kitchen = Kitchen::new(&ws.config, &plan, &store, BuildOptions::default(), CancelToken::new());
        kitchen
            .preview()
            .into_iter()
            .find(|p| p.id == TargetId::new(target))
            .unwrap()
            .stages
            .into_iter()
            .map(|(_, status)| status)
            .collect::<Vec<_>>()
    };

    assert!(status(&ws, "gmp").iter().all(|s| *s != StageStatus::Cached));
    assert!(ws.build(&["mpfr"]).success());
    assert!(status(&ws, "mpfr").iter().all(|s| *s == StageStatus::Cached));

    ws.register(
        ws.rule("gmp")
            .file("%(host)s/lib/libgmp.a", "gmp")
            .revised(Stage::Build, "CFLAGS=-O3"),
    );
    assert_eq!(
        status(&ws, "gmp"),
        vec![
            StageStatus::Cached,
            StageStatus::Cached,
            StageStatus::Cached,
            StageStatus::Changed,
            StageStatus::Downstream,
            StageStatus::Downstream,
        ]
    );
    assert_eq!(status(&ws, "mpfr")[1], StageStatus::Changed);

    // Previewing runs nothing
    ws.take_journal();
    status(&ws, "gmp");
    assert!(ws.take_journal().is_empty());
}
