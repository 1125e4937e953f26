//! The processing pipeline orchestrator.
//!
//! A [`Pipeline`] owns an ordered list of stages and the artifacts they have
//! produced for one dataset. A run executes a selection of stages strictly in
//! pipeline order. The caller drives it with [`Pipeline::tick`], typically
//! once per frame; each tick advances the active stage by one short step, so
//! the calling thread is never blocked for the duration of a tool call.

use std::collections::HashSet;

use colibri_core::{
    ArtifactKind, ArtifactRegistry, CameraSetup, CancelToken, ColibriError, DataHandler,
    ProgressEvent, ProgressKind, ProgressSink, Result, Settings,
};
use crossbeam_channel::Receiver;

use crate::stage::{discard_outputs, Stage, StageContext, StagePoll, StageState};
use crate::stages::{
    ColorTextureArrayStage, DepthTextureArrayStage, GlobalMeshStage, GlobalTextureMapStage,
    PerViewMeshesFromDepthStage, PerViewMeshesStage,
};

/// Why a run stopped at a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Name of the failed stage.
    pub stage: &'static str,
    /// Description of the error.
    pub reason: String,
    /// Last error line printed by an external tool, if any.
    pub last_error_line: Option<String>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every selected stage succeeded.
    Succeeded,
    /// A stage failed; later stages did not run.
    Failed(StageFailure),
    /// The run was canceled while the named stage was active.
    Canceled { stage: &'static str },
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Final state of every stage in pipeline order.
    pub stage_states: Vec<(ArtifactKind, StageState)>,
}

impl RunReport {
    /// Returns true if every selected stage succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }
}

/// Result of a [`Pipeline::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// No run is active.
    Idle,
    /// The run has more work to do.
    Running,
    /// The run ended during this tick.
    Finished(RunReport),
}

struct StageSlot {
    stage: Box<dyn Stage>,
    state: StageState,
}

struct ActiveRun {
    /// Slot indices to run, in pipeline order.
    queue: Vec<usize>,
    position: usize,
    sink: ProgressSink,
}

/// Ordered stages and the artifacts of one dataset.
pub struct Pipeline {
    slots: Vec<StageSlot>,
    artifacts: ArtifactRegistry,
    cancel: CancelToken,
    run: Option<ActiveRun>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "stages",
                &self
                    .slots
                    .iter()
                    .map(|slot| (slot.stage.name(), slot.state))
                    .collect::<Vec<_>>(),
            )
            .field("running", &self.run.is_some())
            .finish_non_exhaustive()
    }
}

/// Checks that kinds are unique and that every dependency is produced by an
/// earlier stage.
fn validate_wiring(stages: &[&dyn Stage]) -> Result<()> {
    let mut produced = HashSet::new();
    for stage in stages {
        for &dependency in stage.dependencies() {
            if !produced.contains(&dependency) {
                return Err(ColibriError::InvalidPipelineWiring {
                    stage: stage.name(),
                    missing: dependency,
                });
            }
        }
        if !produced.insert(stage.kind()) {
            return Err(ColibriError::DuplicateStage(stage.kind()));
        }
    }
    Ok(())
}

impl Pipeline {
    /// Creates a pipeline from stages in execution order.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        let wiring: Vec<&dyn Stage> = stages.iter().map(|stage| stage.as_ref()).collect();
        validate_wiring(&wiring)?;
        Ok(Self {
            slots: stages
                .into_iter()
                .map(|stage| StageSlot {
                    stage,
                    state: StageState::NotStarted,
                })
                .collect(),
            artifacts: ArtifactRegistry::new(),
            cancel: CancelToken::new(),
            run: None,
        })
    }

    /// The six processing stages, configured from `settings`.
    pub fn default_stages(settings: &Settings) -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(ColorTextureArrayStage::new(settings.preview_max_resolution)),
            Box::new(PerViewMeshesStage::new()),
            Box::new(GlobalMeshStage::new(&settings.blender)),
            Box::new(DepthTextureArrayStage::new(settings.depth_map_resolution)),
            Box::new(GlobalTextureMapStage::new(settings.texture_map_resolution)),
            Box::new(PerViewMeshesFromDepthStage::new(
                settings.depth_mesh_grid_step,
            )),
        ]
    }

    /// Creates a pipeline with the default stages.
    pub fn with_settings(settings: &Settings) -> Result<Self> {
        Self::new(Self::default_stages(settings))
    }

    /// Replaces the stage producing the same artifact kind.
    ///
    /// The wiring is validated again; on error the previous stage is kept.
    /// The artifact of the replaced stage and everything downstream of it is
    /// invalidated.
    pub fn replace_stage(&mut self, stage: Box<dyn Stage>) -> Result<()> {
        if self.run.is_some() {
            return Err(ColibriError::RunInProgress);
        }
        let kind = stage.kind();
        let index = self.slot_index(kind)?;
        let mut candidate: Vec<&dyn Stage> =
            self.slots.iter().map(|slot| slot.stage.as_ref()).collect();
        candidate[index] = stage.as_ref();
        validate_wiring(&candidate)?;

        self.slots[index] = StageSlot {
            stage,
            state: StageState::NotStarted,
        };
        self.artifacts.invalidate(kind);
        self.invalidate_downstream(kind);
        log::info!("replaced stage '{kind}'");
        Ok(())
    }

    /// Stage names and kinds in pipeline order.
    pub fn stages(&self) -> impl Iterator<Item = (&'static str, ArtifactKind)> + '_ {
        self.slots.iter().map(|s| (s.stage.name(), s.stage.kind()))
    }

    /// Artifacts produced so far.
    pub fn artifacts(&self) -> &ArtifactRegistry {
        &self.artifacts
    }

    /// State of the stage producing `kind` in the current or last run.
    pub fn stage_state(&self, kind: ArtifactKind) -> Option<StageState> {
        self.slots
            .iter()
            .find(|slot| slot.stage.kind() == kind)
            .map(|slot| slot.state)
    }

    /// Returns true while a run is active.
    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// The flag that cancels the active run at its next tick.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Requests cancellation of the active run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn slot_index(&self, kind: ArtifactKind) -> Result<usize> {
        self.slots
            .iter()
            .position(|slot| slot.stage.kind() == kind)
            .ok_or(ColibriError::StageNotFound(kind))
    }

    /// Checks that the stage producing `kind` may start now and registers its
    /// artifact as scheduled.
    pub fn schedule(&mut self, kind: ArtifactKind) -> Result<()> {
        let index = self.slot_index(kind)?;
        let stage = &self.slots[index].stage;
        if let Some(&missing) = stage
            .dependencies()
            .iter()
            .find(|&&dependency| !self.artifacts.is_ready(dependency))
        {
            return Err(ColibriError::DependencyNotSatisfied {
                stage: stage.name(),
                missing,
            });
        }
        self.artifacts.schedule(kind);
        Ok(())
    }

    /// Kinds whose stages depend, directly or not, on `kind`.
    fn downstream_of(&self, kind: ArtifactKind) -> Vec<ArtifactKind> {
        let mut affected = vec![kind];
        for slot in &self.slots {
            if slot
                .stage
                .dependencies()
                .iter()
                .any(|dependency| affected.contains(dependency))
            {
                affected.push(slot.stage.kind());
            }
        }
        affected.remove(0);
        affected
    }

    fn invalidate_downstream(&mut self, kind: ArtifactKind) {
        for downstream in self.downstream_of(kind) {
            if self.artifacts.invalidate(downstream) {
                log::info!("artifact '{downstream}' invalidated by a change of '{kind}'");
            }
        }
    }

    /// Starts a run of the selected stages.
    ///
    /// Stages run in pipeline order whatever the order of `selection`. Every
    /// dependency of a selected stage must either be ready already or be
    /// produced by a selected stage. Pass [`ArtifactKind::ALL`] to run
    /// everything.
    pub fn start_run(
        &mut self,
        selection: &[ArtifactKind],
        data: &DataHandler,
    ) -> Result<Receiver<ProgressEvent>> {
        if self.run.is_some() {
            return Err(ColibriError::RunInProgress);
        }
        let status = data.check_status_of_source_data()?;
        if !status.has_source_images() {
            return Err(ColibriError::NoSourceImages(data.color_directory()));
        }
        for &kind in selection {
            self.slot_index(kind)?;
        }

        let mut queue = Vec::new();
        let mut produced = HashSet::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let kind = slot.stage.kind();
            if !selection.contains(&kind) {
                continue;
            }
            for &dependency in slot.stage.dependencies() {
                if !produced.contains(&dependency) && !self.artifacts.is_ready(dependency) {
                    return Err(ColibriError::DependencyNotSatisfied {
                        stage: slot.stage.name(),
                        missing: dependency,
                    });
                }
            }
            produced.insert(kind);
            queue.push(index);
        }

        for slot in &mut self.slots {
            slot.state = StageState::NotStarted;
        }
        for &index in &queue {
            self.artifacts.schedule(self.slots[index].stage.kind());
        }
        self.cancel.reset();
        let (sink, receiver) = ProgressSink::channel();
        log::info!(
            "starting processing run: {}",
            queue
                .iter()
                .map(|&i| self.slots[i].stage.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.run = Some(ActiveRun {
            queue,
            position: 0,
            sink,
        });
        Ok(receiver)
    }

    /// Advances the active run by one step.
    pub fn tick(&mut self, setup: &CameraSetup, data: &DataHandler) -> RunStatus {
        let Some(run) = self.run.as_ref() else {
            return RunStatus::Idle;
        };
        let Some(&index) = run.queue.get(run.position) else {
            return RunStatus::Finished(self.finish(RunOutcome::Succeeded));
        };
        let sink = run.sink.for_stage(self.slots[index].stage.name());

        if self.cancel.is_canceled() {
            return RunStatus::Finished(self.stop_canceled(index, data, &sink));
        }

        if self.slots[index].state == StageState::NotStarted {
            return match self.start_stage(index, setup, data, &sink) {
                Ok(()) => RunStatus::Running,
                Err(error) => RunStatus::Finished(self.stop_failed(index, &error, data, &sink)),
            };
        }

        let polled = {
            let Self {
                slots, artifacts, ..
            } = self;
            let ctx = StageContext {
                setup,
                data,
                artifacts,
                progress: &sink,
            };
            slots[index].stage.poll(&ctx)
        };
        match polled {
            Ok(StagePoll::Pending) => RunStatus::Running,
            Ok(StagePoll::Complete(artifact)) => {
                let slot = &mut self.slots[index];
                log::info!(
                    "stage '{}' succeeded: {:?}",
                    slot.stage.name(),
                    artifact.summary
                );
                slot.state = StageState::Succeeded;
                self.artifacts.insert(artifact);
                sink.emit(ProgressKind::Finished);

                let finished = self.run.as_mut().is_some_and(|run| {
                    run.position += 1;
                    run.position == run.queue.len()
                });
                if finished {
                    RunStatus::Finished(self.finish(RunOutcome::Succeeded))
                } else {
                    RunStatus::Running
                }
            }
            Err(error) => RunStatus::Finished(self.stop_failed(index, &error, data, &sink)),
        }
    }

    fn start_stage(
        &mut self,
        index: usize,
        setup: &CameraSetup,
        data: &DataHandler,
        sink: &ProgressSink,
    ) -> Result<()> {
        let kind = self.slots[index].stage.kind();
        self.schedule(kind)?;
        self.artifacts.invalidate(kind);
        self.invalidate_downstream(kind);

        log::info!("stage '{}' started", self.slots[index].stage.name());
        self.slots[index].state = StageState::Running;
        sink.emit(ProgressKind::Started);
        let Self {
            slots, artifacts, ..
        } = self;
        let ctx = StageContext {
            setup,
            data,
            artifacts,
            progress: sink,
        };
        slots[index].stage.begin(&ctx)
    }

    fn stop_failed(
        &mut self,
        index: usize,
        error: &ColibriError,
        data: &DataHandler,
        sink: &ProgressSink,
    ) -> RunReport {
        let slot = &mut self.slots[index];
        let stage = slot.stage.name();
        log::error!("stage '{stage}' failed: {error}");
        // A stage refused before `begin` keeps its previous output.
        if slot.state == StageState::Running {
            slot.stage.cancel();
            discard_outputs(&slot.stage.output_paths(data));
            let kind = slot.stage.kind();
            self.artifacts.clear(kind);
        }
        self.slots[index].state = StageState::Failed;
        sink.warning(error.to_string());
        sink.emit(ProgressKind::Finished);

        let last_error_line = match error {
            ColibriError::ToolFailed { last_line, .. } => last_line.clone(),
            _ => None,
        };
        self.finish(RunOutcome::Failed(StageFailure {
            stage,
            reason: error.to_string(),
            last_error_line,
        }))
    }

    fn stop_canceled(&mut self, index: usize, data: &DataHandler, sink: &ProgressSink) -> RunReport {
        let slot = &mut self.slots[index];
        let stage = slot.stage.name();
        log::info!("stage '{stage}' canceled");
        // A stage that never began keeps its artifact and stays `NotStarted`.
        if slot.state == StageState::Running {
            slot.stage.cancel();
            discard_outputs(&slot.stage.output_paths(data));
            slot.state = StageState::Canceled;
            let kind = slot.stage.kind();
            self.artifacts.clear(kind);
            sink.emit(ProgressKind::Finished);
        }
        self.finish(RunOutcome::Canceled { stage })
    }

    fn finish(&mut self, outcome: RunOutcome) -> RunReport {
        self.run = None;
        match &outcome {
            RunOutcome::Succeeded => log::info!("processing run succeeded"),
            RunOutcome::Failed(failure) => log::info!("processing run halted at '{}'", failure.stage),
            RunOutcome::Canceled { stage } => log::info!("processing run canceled at '{stage}'"),
        }
        RunReport {
            outcome,
            stage_states: self
                .slots
                .iter()
                .map(|slot| (slot.stage.kind(), slot.state))
                .collect(),
        }
    }

    /// Runs the selected stages to the end on the calling thread.
    ///
    /// Progress events are discarded; they are still logged by the stages.
    pub fn run_blocking(
        &mut self,
        selection: &[ArtifactKind],
        setup: &CameraSetup,
        data: &DataHandler,
    ) -> Result<RunReport> {
        let _events = self.start_run(selection, data)?;
        loop {
            match self.tick(setup, data) {
                RunStatus::Finished(report) => return Ok(report),
                RunStatus::Idle => {
                    return Err(ColibriError::StageFailed {
                        stage: "pipeline",
                        reason: "run ended without a report".to_string(),
                    })
                }
                RunStatus::Running => std::thread::yield_now(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colibri_core::{Artifact, ArtifactState, ArtifactSummary};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A stage that needs a fixed number of polls and writes one file.
    struct FakeStage {
        kind: ArtifactKind,
        dependencies: &'static [ArtifactKind],
        polls: usize,
        remaining: usize,
        fail_with: Option<String>,
        canceled: Arc<AtomicBool>,
        begun: Arc<AtomicUsize>,
    }

    impl FakeStage {
        fn new(kind: ArtifactKind, dependencies: &'static [ArtifactKind]) -> Self {
            Self {
                kind,
                dependencies,
                polls: 2,
                remaining: 0,
                fail_with: None,
                canceled: Arc::new(AtomicBool::new(false)),
                begun: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(mut self, line: &str) -> Self {
            self.fail_with = Some(line.to_string());
            self
        }

        fn output(data: &DataHandler, kind: ArtifactKind) -> PathBuf {
            data.processing_directory().join(format!("{kind}.txt"))
        }
    }

    impl Stage for FakeStage {
        fn name(&self) -> &'static str {
            self.kind.as_str()
        }

        fn kind(&self) -> ArtifactKind {
            self.kind
        }

        fn dependencies(&self) -> &'static [ArtifactKind] {
            self.dependencies
        }

        fn output_paths(&self, data: &DataHandler) -> Vec<PathBuf> {
            vec![Self::output(data, self.kind)]
        }

        fn begin(&mut self, ctx: &StageContext<'_>) -> Result<()> {
            for &dependency in self.dependencies {
                ctx.dependency(self.name(), dependency)?;
            }
            self.begun.fetch_add(1, Ordering::SeqCst);
            self.remaining = self.polls;
            let path = Self::output(ctx.data, self.kind);
            fs::create_dir_all(ctx.data.processing_directory())?;
            fs::write(&path, b"partial")?;
            Ok(())
        }

        fn poll(&mut self, ctx: &StageContext<'_>) -> Result<StagePoll> {
            if self.remaining > 0 {
                self.remaining -= 1;
                ctx.progress.message("working");
                return Ok(StagePoll::Pending);
            }
            if let Some(line) = &self.fail_with {
                return Err(ColibriError::ToolFailed {
                    tool: "fake".into(),
                    script: "fake.py".into(),
                    reason: "exited with status 1".into(),
                    last_line: Some(line.clone()),
                });
            }
            Ok(StagePoll::Complete(Artifact::ready(
                self.kind,
                vec![Self::output(ctx.data, self.kind)],
                ArtifactSummary {
                    face_count: Some(12),
                    ..Default::default()
                },
            )))
        }

        fn cancel(&mut self) {
            self.canceled.store(true, Ordering::SeqCst);
        }
    }

    fn dataset() -> (tempfile::TempDir, DataHandler) {
        let dir = tempfile::tempdir().unwrap();
        let data = DataHandler::new(dir.path());
        fs::create_dir_all(data.color_directory()).unwrap();
        fs::write(data.color_directory().join("frame_0001.jpg"), b"jpg").unwrap();
        (dir, data)
    }

    const CHAIN: [ArtifactKind; 4] = [
        ArtifactKind::ColorTextureArray,
        ArtifactKind::PerViewMeshes,
        ArtifactKind::GlobalMesh,
        ArtifactKind::DepthTextureArray,
    ];

    fn chain() -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(FakeStage::new(ArtifactKind::ColorTextureArray, &[])),
            Box::new(FakeStage::new(
                ArtifactKind::PerViewMeshes,
                &[ArtifactKind::ColorTextureArray],
            )),
            Box::new(FakeStage::new(ArtifactKind::GlobalMesh, &[])),
            Box::new(FakeStage::new(
                ArtifactKind::DepthTextureArray,
                &[ArtifactKind::GlobalMesh],
            )),
        ]
    }

    fn run_to_end(pipeline: &mut Pipeline, data: &DataHandler) -> RunReport {
        let setup = CameraSetup::new();
        for _ in 0..100 {
            if let RunStatus::Finished(report) = pipeline.tick(&setup, data) {
                return report;
            }
        }
        panic!("run did not finish");
    }

    #[test]
    fn test_wiring_validation() {
        let err = Pipeline::new(vec![
            Box::new(FakeStage::new(
                ArtifactKind::DepthTextureArray,
                &[ArtifactKind::GlobalMesh],
            )),
            Box::new(FakeStage::new(ArtifactKind::GlobalMesh, &[])),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ColibriError::InvalidPipelineWiring {
                stage: "depth_texture_array",
                missing: ArtifactKind::GlobalMesh
            }
        ));

        let err = Pipeline::new(vec![
            Box::new(FakeStage::new(ArtifactKind::GlobalMesh, &[])),
            Box::new(FakeStage::new(ArtifactKind::GlobalMesh, &[])),
        ])
        .unwrap_err();
        assert!(matches!(err, ColibriError::DuplicateStage(ArtifactKind::GlobalMesh)));
    }

    #[test]
    fn test_default_stages_are_wired() {
        let pipeline = Pipeline::with_settings(&Settings::default()).unwrap();
        let kinds: Vec<ArtifactKind> = pipeline.stages().map(|(_, kind)| kind).collect();
        assert_eq!(kinds, ArtifactKind::ALL.to_vec());
    }

    #[test]
    fn test_replace_stage_revalidates() {
        let mut pipeline = Pipeline::new(chain()).unwrap();
        let err = pipeline
            .replace_stage(Box::new(FakeStage::new(
                ArtifactKind::GlobalMesh,
                &[ArtifactKind::DepthTextureArray],
            )))
            .unwrap_err();
        assert!(matches!(err, ColibriError::InvalidPipelineWiring { .. }));
        pipeline
            .replace_stage(Box::new(FakeStage::new(ArtifactKind::GlobalMesh, &[])))
            .unwrap();
        let err = pipeline
            .replace_stage(Box::new(FakeStage::new(ArtifactKind::GlobalTextureMap, &[])))
            .unwrap_err();
        assert!(matches!(
            err,
            ColibriError::StageNotFound(ArtifactKind::GlobalTextureMap)
        ));
    }

    #[test]
    fn test_schedule_requires_ready_dependencies() {
        let mut pipeline = Pipeline::new(chain()).unwrap();
        let err = pipeline.schedule(ArtifactKind::DepthTextureArray).unwrap_err();
        assert!(matches!(
            err,
            ColibriError::DependencyNotSatisfied {
                stage: "depth_texture_array",
                missing: ArtifactKind::GlobalMesh
            }
        ));
        pipeline.schedule(ArtifactKind::GlobalMesh).unwrap();
        assert_eq!(
            pipeline.artifacts().state(ArtifactKind::GlobalMesh),
            ArtifactState::Empty
        );
    }

    #[test]
    fn test_start_run_checks_dependencies_against_selection() {
        let (_dir, data) = dataset();
        let mut pipeline = Pipeline::new(chain()).unwrap();
        let err = pipeline
            .start_run(&[ArtifactKind::DepthTextureArray], &data)
            .unwrap_err();
        assert!(matches!(err, ColibriError::DependencyNotSatisfied { .. }));
        assert!(!pipeline.is_running());

        pipeline
            .start_run(
                &[ArtifactKind::DepthTextureArray, ArtifactKind::GlobalMesh],
                &data,
            )
            .unwrap();
        assert!(pipeline.is_running());
    }

    #[test]
    fn test_start_run_requires_source_images() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataHandler::new(dir.path());
        let mut pipeline = Pipeline::new(chain()).unwrap();
        let err = pipeline.start_run(&CHAIN, &data).unwrap_err();
        assert!(matches!(err, ColibriError::NoSourceImages(_)));
    }

    #[test]
    fn test_run_in_progress_is_rejected() {
        let (_dir, data) = dataset();
        let mut pipeline = Pipeline::new(chain()).unwrap();
        pipeline.start_run(&CHAIN, &data).unwrap();
        assert!(matches!(
            pipeline.start_run(&CHAIN, &data),
            Err(ColibriError::RunInProgress)
        ));
    }

    #[test]
    fn test_full_run_succeeds_in_order() {
        let (_dir, data) = dataset();
        let mut pipeline = Pipeline::new(chain()).unwrap();
        let events = pipeline.start_run(&CHAIN, &data).unwrap();
        let report = run_to_end(&mut pipeline, &data);

        assert!(report.is_success());
        assert!(report
            .stage_states
            .iter()
            .all(|(_, state)| *state == StageState::Succeeded));
        for kind in [
            ArtifactKind::ColorTextureArray,
            ArtifactKind::PerViewMeshes,
            ArtifactKind::GlobalMesh,
            ArtifactKind::DepthTextureArray,
        ] {
            assert!(pipeline.artifacts().is_ready(kind));
        }

        let started: Vec<&str> = events
            .try_iter()
            .filter(|e| e.kind == ProgressKind::Started)
            .map(|e| e.stage)
            .collect();
        assert_eq!(
            started,
            vec![
                "color_texture_array",
                "per_view_meshes",
                "global_mesh",
                "depth_texture_array"
            ]
        );
        assert_eq!(pipeline.tick(&CameraSetup::new(), &data), RunStatus::Idle);
    }

    #[test]
    fn test_failure_halts_and_discards_output() {
        let (_dir, data) = dataset();
        let depth = FakeStage::new(ArtifactKind::DepthTextureArray, &[ArtifactKind::GlobalMesh]);
        let depth_begun = Arc::clone(&depth.begun);
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(FakeStage::new(ArtifactKind::ColorTextureArray, &[])),
            Box::new(FakeStage::new(
                ArtifactKind::PerViewMeshes,
                &[ArtifactKind::ColorTextureArray],
            )),
            Box::new(FakeStage::new(ArtifactKind::GlobalMesh, &[]).failing("Error: bad mesh")),
            Box::new(depth),
        ];
        let mut pipeline = Pipeline::new(stages).unwrap();
        pipeline.start_run(&CHAIN, &data).unwrap();
        let report = run_to_end(&mut pipeline, &data);

        let RunOutcome::Failed(failure) = &report.outcome else {
            panic!("expected failure, got {:?}", report.outcome);
        };
        assert_eq!(failure.stage, "global_mesh");
        assert_eq!(failure.last_error_line.as_deref(), Some("Error: bad mesh"));

        assert_eq!(
            pipeline.stage_state(ArtifactKind::GlobalMesh),
            Some(StageState::Failed)
        );
        assert_eq!(
            pipeline.stage_state(ArtifactKind::DepthTextureArray),
            Some(StageState::NotStarted)
        );
        assert_eq!(depth_begun.load(Ordering::SeqCst), 0);
        // Earlier stages keep their artifacts.
        assert!(pipeline.artifacts().is_ready(ArtifactKind::PerViewMeshes));
        assert!(!pipeline.artifacts().is_ready(ArtifactKind::GlobalMesh));
        assert!(!FakeStage::output(&data, ArtifactKind::GlobalMesh).exists());
    }

    #[test]
    fn test_cancel_mid_stage() {
        let (_dir, data) = dataset();
        let stage = FakeStage::new(ArtifactKind::GlobalMesh, &[]);
        let canceled = Arc::clone(&stage.canceled);
        let mut pipeline = Pipeline::new(vec![Box::new(stage)]).unwrap();
        pipeline
            .start_run(&[ArtifactKind::GlobalMesh], &data)
            .unwrap();

        let setup = CameraSetup::new();
        assert_eq!(pipeline.tick(&setup, &data), RunStatus::Running);
        assert_eq!(
            pipeline.stage_state(ArtifactKind::GlobalMesh),
            Some(StageState::Running)
        );
        pipeline.cancel_token().cancel();

        let RunStatus::Finished(report) = pipeline.tick(&setup, &data) else {
            panic!("expected the run to stop");
        };
        assert_eq!(
            report.outcome,
            RunOutcome::Canceled {
                stage: "global_mesh"
            }
        );
        assert!(canceled.load(Ordering::SeqCst));
        assert!(!pipeline.artifacts().is_ready(ArtifactKind::GlobalMesh));
        assert!(!FakeStage::output(&data, ArtifactKind::GlobalMesh).exists());

        // The next run starts with a cleared flag.
        pipeline
            .start_run(&[ArtifactKind::GlobalMesh], &data)
            .unwrap();
        assert!(!pipeline.cancel_token().is_canceled());
    }

    #[test]
    fn test_cancel_before_stage_begins_keeps_artifacts() {
        let (_dir, data) = dataset();
        let mut pipeline = Pipeline::new(chain()).unwrap();
        pipeline.start_run(&CHAIN, &data).unwrap();
        assert!(run_to_end(&mut pipeline, &data).is_success());

        pipeline
            .start_run(&[ArtifactKind::GlobalMesh], &data)
            .unwrap();
        pipeline.cancel();
        let report = run_to_end(&mut pipeline, &data);
        assert_eq!(
            report.outcome,
            RunOutcome::Canceled {
                stage: "global_mesh"
            }
        );
        assert_eq!(
            pipeline.stage_state(ArtifactKind::GlobalMesh),
            Some(StageState::NotStarted)
        );
        assert!(pipeline.artifacts().is_ready(ArtifactKind::GlobalMesh));
        assert!(FakeStage::output(&data, ArtifactKind::GlobalMesh).exists());
        assert!(pipeline.artifacts().is_ready(ArtifactKind::DepthTextureArray));
    }

    #[test]
    fn test_stage_refused_at_start_keeps_previous_output() {
        let (_dir, data) = dataset();
        let mut stages = chain();
        stages.push(Box::new(FakeStage::new(
            ArtifactKind::PerViewMeshesFromDepth,
            &[ArtifactKind::DepthTextureArray],
        )));
        let mut pipeline = Pipeline::new(stages).unwrap();
        let mut everything = CHAIN.to_vec();
        everything.push(ArtifactKind::PerViewMeshesFromDepth);
        pipeline.start_run(&everything, &data).unwrap();
        assert!(run_to_end(&mut pipeline, &data).is_success());

        // Rebuilding the global mesh invalidates the depth layers the last
        // stage reads, so that stage is refused when its turn comes.
        pipeline
            .start_run(
                &[ArtifactKind::GlobalMesh, ArtifactKind::PerViewMeshesFromDepth],
                &data,
            )
            .unwrap();
        let report = run_to_end(&mut pipeline, &data);
        let RunOutcome::Failed(failure) = &report.outcome else {
            panic!("expected failure, got {:?}", report.outcome);
        };
        assert_eq!(failure.stage, "per_view_meshes_depth");
        assert!(pipeline.artifacts().is_ready(ArtifactKind::GlobalMesh));
        assert_eq!(
            pipeline.artifacts().state(ArtifactKind::PerViewMeshesFromDepth),
            ArtifactState::Invalidated
        );
        assert!(FakeStage::output(&data, ArtifactKind::PerViewMeshesFromDepth).exists());
    }

    #[test]
    fn test_rerun_invalidates_downstream() {
        let (_dir, data) = dataset();
        let mut pipeline = Pipeline::new(chain()).unwrap();
        pipeline.start_run(&CHAIN, &data).unwrap();
        let first = run_to_end(&mut pipeline, &data);
        assert!(first.is_success());
        let first_summary = pipeline
            .artifacts()
            .get(ArtifactKind::GlobalMesh)
            .map(|artifact| artifact.summary);

        pipeline
            .start_run(&[ArtifactKind::GlobalMesh], &data)
            .unwrap();
        let second = run_to_end(&mut pipeline, &data);
        assert!(second.is_success());
        assert!(pipeline.artifacts().is_ready(ArtifactKind::GlobalMesh));
        assert_eq!(
            pipeline.artifacts().state(ArtifactKind::DepthTextureArray),
            ArtifactState::Invalidated
        );
        assert!(pipeline.artifacts().is_ready(ArtifactKind::PerViewMeshes));
        assert_eq!(
            pipeline
                .artifacts()
                .get(ArtifactKind::GlobalMesh)
                .map(|artifact| artifact.summary),
            first_summary
        );
    }

    #[test]
    fn test_run_blocking() {
        let (_dir, data) = dataset();
        let mut pipeline = Pipeline::new(chain()).unwrap();
        let report = pipeline
            .run_blocking(&CHAIN, &CameraSetup::new(), &data)
            .unwrap();
        assert!(report.is_success());
    }
}
