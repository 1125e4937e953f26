//! The processing context of one dataset.

use std::path::PathBuf;

use colibri_core::{
    ArtifactKind, ArtifactRegistry, CameraSetup, CancelToken, ColibriError, DataHandler,
    DatasetStatus, ProgressEvent, Result, Settings,
};
use colibri_processing::{
    persist_camera_setup, ParsedDataset, Pipeline, RunReport, RunStatus, ScannerAppParser,
};
use colibri_render::RenderSession;
use crossbeam_channel::Receiver;

/// A dataset directory with its camera setup, processing pipeline and
/// artifacts.
///
/// The context owns the setup exclusively. While a processing run is active
/// the setup cannot be replaced and no render session can start.
#[derive(Debug)]
pub struct DatasetContext {
    data: DataHandler,
    settings: Settings,
    setup: CameraSetup,
    pipeline: Pipeline,
}

impl DatasetContext {
    /// Opens a dataset directory.
    ///
    /// An existing setup-description file is loaded; otherwise the setup
    /// stays empty until [`parse_camera_setup`](Self::parse_camera_setup).
    pub fn open(root: impl Into<PathBuf>, settings: Settings) -> Result<Self> {
        let data = DataHandler::new(root);
        let setup = if data.camera_setup_path().is_file() {
            CameraSetup::load(&data.camera_setup_path())?
        } else {
            CameraSetup::new()
        };
        let pipeline = Pipeline::with_settings(&settings)?;
        log::info!(
            "opened dataset {} ({} cameras)",
            data.data_directory().display(),
            setup.len()
        );
        Ok(Self {
            data,
            settings,
            setup,
            pipeline,
        })
    }

    /// Dataset paths.
    pub fn data(&self) -> &DataHandler {
        &self.data
    }

    /// Settings in use.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current camera setup.
    pub fn setup(&self) -> &CameraSetup {
        &self.setup
    }

    /// The processing pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The processing pipeline, for replacing stages.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Artifacts produced so far.
    pub fn artifacts(&self) -> &ArtifactRegistry {
        self.pipeline.artifacts()
    }

    /// What the dataset directory contains.
    pub fn status(&self) -> Result<DatasetStatus> {
        self.data.check_status_of_source_data()
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.pipeline.is_running() {
            return Err(ColibriError::RunInProgress);
        }
        Ok(())
    }

    fn replace_setup(&mut self, setup: CameraSetup) -> Result<()> {
        self.setup = setup;
        // Artifacts of the previous setup no longer apply.
        self.pipeline = Pipeline::with_settings(&self.settings)?;
        Ok(())
    }

    /// Parses the scanner-app export, persists the setup description and
    /// makes it the current setup.
    ///
    /// Nothing is persisted when parsing fails.
    pub fn parse_camera_setup(&mut self) -> Result<ParsedDataset> {
        self.ensure_idle()?;
        let status = self.status()?;
        if !status.has_source_images() {
            return Err(ColibriError::NoSourceImages(self.data.color_directory()));
        }
        let parsed = ScannerAppParser::new(self.settings.reposition_around_center).parse(&self.data)?;
        persist_camera_setup(&self.data, &parsed.setup)?;
        log::info!(
            "parsed {} cameras ({} ambiguous image matches)",
            parsed.setup.len(),
            parsed.ambiguous_matches().count()
        );
        self.replace_setup(parsed.setup.clone())?;
        Ok(parsed)
    }

    /// Reloads the setup description from disk.
    pub fn load_camera_setup(&mut self) -> Result<()> {
        self.ensure_idle()?;
        let setup = CameraSetup::load(&self.data.camera_setup_path())?;
        self.replace_setup(setup)
    }

    /// Starts a processing run of the selected stages.
    pub fn start_processing(&mut self, selection: &[ArtifactKind]) -> Result<Receiver<ProgressEvent>> {
        if self.setup.is_empty() {
            return Err(ColibriError::EmptyCameraSetup);
        }
        self.pipeline.start_run(selection, &self.data)
    }

    /// Advances the active processing run by one step.
    pub fn tick(&mut self) -> RunStatus {
        self.pipeline.tick(&self.setup, &self.data)
    }

    /// The flag that cancels the active run.
    pub fn cancel_token(&self) -> CancelToken {
        self.pipeline.cancel_token()
    }

    /// Runs the selected stages to the end on the calling thread.
    pub fn run_processing(&mut self, selection: &[ArtifactKind]) -> Result<RunReport> {
        if self.setup.is_empty() {
            return Err(ColibriError::EmptyCameraSetup);
        }
        self.pipeline
            .run_blocking(selection, &self.setup, &self.data)
    }

    /// Starts rendering from the given artifacts.
    pub fn begin_render(&self, required: &[ArtifactKind]) -> Result<RenderSession> {
        self.ensure_idle()?;
        RenderSession::begin(
            &self.setup,
            self.pipeline.artifacts(),
            required,
            &self.settings.focal,
        )
    }
}
