//! Conversion adapter: genetic-design file to one or more model-exchange files.
//!
//! The converter may explode one design into several interrelated modules.
//! The adapter, not the caller, decides between a single file and a
//! multi-module result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::archive::{self, Archive};
use crate::config::EngineConfig;
use crate::engine::{EngineInvocation, EngineRunner, CONVERSION_OUT_DIR_FLAG};
use crate::error::{PipelineError, PipelineResult};
use crate::params::{ParameterSet, CONVERSION_PARAMETERS, REPOSITORY, TOP_MODEL_ID, URI_PREFIX};
use crate::workdir::WorkingDirectory;

/// Name passed to the converter's `-o`; never reported as an output.
pub const PLACEHOLDER_OUTPUT: &str = "dummy.xml";
/// Stem suffix the converter gives the top-level module.
pub const TOP_MODULE_SUFFIX: &str = "_topModule";
/// File name of the COMBINE archive built for multi-module results.
pub const COMBINE_ARCHIVE_NAME: &str = "converted.omex";

/// What the caller wants back when several modules are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionTarget {
    /// A path to the top module, to feed straight into analysis.
    TopModulePath,
    /// A COMBINE archive with every module, to stream to the client.
    Archive,
}

/// How a multi-module conversion was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiOutput {
    TopModule(PathBuf),
    Combine(Archive),
}

/// Result of a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionResult {
    /// Exactly one model-exchange file.
    SinglePath(PathBuf),
    /// Several modules, resolved per [`ConversionTarget`].
    MultiArchive {
        modules: Vec<PathBuf>,
        output: MultiOutput,
    },
}

impl ConversionResult {
    /// The model file to simulate, when the result is a path.
    pub fn model_path(&self) -> Option<&Path> {
        match self {
            ConversionResult::SinglePath(path) => Some(path),
            ConversionResult::MultiArchive {
                output: MultiOutput::TopModule(path),
                ..
            } => Some(path),
            ConversionResult::MultiArchive {
                output: MultiOutput::Combine(_),
                ..
            } => None,
        }
    }

    pub fn module_count(&self) -> usize {
        match self {
            ConversionResult::SinglePath(_) => 1,
            ConversionResult::MultiArchive { modules, .. } => modules.len(),
        }
    }
}

/// Drives the converter through an [`EngineRunner`].
#[derive(Clone)]
pub struct ConversionAdapter {
    runner: Arc<dyn EngineRunner>,
    engine: EngineConfig,
}

impl ConversionAdapter {
    pub fn new(runner: Arc<dyn EngineRunner>, engine: EngineConfig) -> Self {
        Self { runner, engine }
    }

    /// Convert `input` inside `workdir`.
    pub async fn convert(
        &self,
        input: &Path,
        workdir: &WorkingDirectory,
        parameters: &ParameterSet,
        target: ConversionTarget,
    ) -> PipelineResult<ConversionResult> {
        let staged = if workdir.contains(input) {
            input.to_path_buf()
        } else {
            workdir.stage_input(input).await?
        };
        let out_dir = workdir.converted();
        tokio::fs::create_dir_all(&out_dir).await?;

        let invocation = self.invocation(&staged, &out_dir, workdir.path(), parameters);
        info!(input = %staged.display(), "converting genetic design to model-exchange");
        let outcome = self.runner.run(&invocation).await?.into_result()?;

        let modules = list_outputs(&out_dir).await?;
        debug!(count = modules.len(), "conversion produced modules");

        match modules.len() {
            0 => Err(PipelineError::NoOutput {
                stdout: outcome.stdout,
            }),
            1 => Ok(ConversionResult::SinglePath(modules[0].clone())),
            _ => {
                let output = match target {
                    ConversionTarget::TopModulePath => {
                        let top_model_id = parameters.text(TOP_MODEL_ID);
                        let top = resolve_top_module(&modules, top_model_id).ok_or_else(|| {
                            PipelineError::UnresolvedTopModule {
                                top_model_id: top_model_id.map(str::to_string),
                                candidates: file_names(&modules),
                            }
                        })?;
                        MultiOutput::TopModule(top)
                    }
                    ConversionTarget::Archive => {
                        let dest = workdir.path().join(COMBINE_ARCHIVE_NAME);
                        let models = modules.clone();
                        let archive = tokio::task::spawn_blocking(move || {
                            archive::build_combine_archive(&models, &dest)
                        })
                        .await??;
                        MultiOutput::Combine(archive)
                    }
                };
                Ok(ConversionResult::MultiArchive { modules, output })
            }
        }
    }

    fn invocation(
        &self,
        input: &Path,
        out_dir: &Path,
        cwd: &Path,
        parameters: &ParameterSet,
    ) -> EngineInvocation {
        let mut inv = EngineInvocation::new(&self.engine.program, &self.engine.conversion_args)
            .args(["-i", "-l", "SBML"]);
        if !parameters.contains(URI_PREFIX) {
            inv = inv.arg("-p").arg(&self.engine.uri_prefix);
        }
        if !parameters.contains(REPOSITORY) {
            inv = inv.arg("-r").arg(&self.engine.repository);
        }

        inv.args(CONVERSION_PARAMETERS.encode_args(parameters))
            .arg("-o")
            .arg(PLACEHOLDER_OUTPUT)
            .out_dir_flag(CONVERSION_OUT_DIR_FLAG, out_dir)
            .input(input)
            .current_dir(cwd)
            .timeout(self.engine.timeout())
    }
}

/// Files the converter wrote, sorted by name, without the placeholder.
async fn list_outputs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() || entry.file_name() == PLACEHOLDER_OUTPUT {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

/// Pick the top module: exact id match first, then the `_topModule` convention.
///
/// `None` when neither rule matches.
pub fn resolve_top_module(modules: &[PathBuf], top_model_id: Option<&str>) -> Option<PathBuf> {
    let stem = |p: &PathBuf| p.file_stem().map(|s| s.to_string_lossy().to_string());
    let name = |p: &PathBuf| p.file_name().map(|s| s.to_string_lossy().to_string());

    let by_id = top_model_id.and_then(|id| {
        modules
            .iter()
            .find(|m| stem(m).as_deref() == Some(id) || name(m).as_deref() == Some(id))
    });

    by_id
        .or_else(|| {
            modules
                .iter()
                .find(|m| stem(m).map(|s| s.ends_with(TOP_MODULE_SUFFIX)).unwrap_or(false))
        })
        .cloned()
}

fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOutcome;
    use crate::fakes::{write_outputs, ScriptedEngine};
    use crate::params::ParamValue;
    use uuid::Uuid;

    struct Fixture {
        _base: tempfile::TempDir,
        input: PathBuf,
        workdir: WorkingDirectory,
    }

    async fn fixture() -> Fixture {
        let base = tempfile::tempdir().unwrap();
        let input = base.path().join("Circuit0x8E.sbol");
        std::fs::write(&input, "<sbol:ComponentDefinition/>").unwrap();
        let workdir = WorkingDirectory::create(base.path(), "conversion", Uuid::new_v4())
            .await
            .unwrap();
        Fixture {
            _base: base,
            input,
            workdir,
        }
    }

    fn adapter(engine: ScriptedEngine) -> (Arc<ScriptedEngine>, ConversionAdapter) {
        let engine = Arc::new(engine);
        let adapter = ConversionAdapter::new(engine.clone(), EngineConfig::direct("converter"));
        (engine, adapter)
    }

    #[tokio::test]
    async fn test_single_output_is_single_path() {
        let fx = fixture().await;
        let (engine, adapter) = adapter(ScriptedEngine::writing(&[("module1.xml", "<sbml/>")]));

        let result = adapter
            .convert(&fx.input, &fx.workdir, &ParameterSet::new(), ConversionTarget::Archive)
            .await
            .unwrap();

        assert_eq!(
            result,
            ConversionResult::SinglePath(fx.workdir.converted().join("module1.xml"))
        );
        let inv = &engine.invocations()[0];
        assert_eq!(inv.program, "converter");
        assert!(inv.args.starts_with(&["-i".to_string(), "-l".to_string(), "SBML".to_string()]));
        assert_eq!(inv.out_dir(), Some(fx.workdir.converted()));
        assert_eq!(inv.input_path(), Some(fx.workdir.path().join("input.sbol")));
    }

    #[tokio::test]
    async fn test_placeholder_is_not_an_output() {
        let fx = fixture().await;
        let (_, adapter) = adapter(ScriptedEngine::writing(&[
            (PLACEHOLDER_OUTPUT, ""),
            ("only.xml", "<sbml/>"),
        ]));
        let result = adapter
            .convert(&fx.input, &fx.workdir, &ParameterSet::new(), ConversionTarget::TopModulePath)
            .await
            .unwrap();
        assert_eq!(result.module_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_outputs_is_no_output_error() {
        let fx = fixture().await;
        let (_, adapter) = adapter(ScriptedEngine::new(|_| Ok(EngineOutcome::succeeded("nothing to do"))));

        match adapter
            .convert(&fx.input, &fx.workdir, &ParameterSet::new(), ConversionTarget::Archive)
            .await
        {
            Err(PipelineError::NoOutput { stdout }) => assert_eq!(stdout, "nothing to do"),
            other => panic!("expected NoOutput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_engine_failure_is_invocation_error() {
        let fx = fixture().await;
        let (_, adapter) = adapter(ScriptedEngine::failing(1, "bad SBOL"));
        match adapter
            .convert(&fx.input, &fx.workdir, &ParameterSet::new(), ConversionTarget::Archive)
            .await
        {
            Err(PipelineError::EngineInvocation { stderr, .. }) => assert_eq!(stderr, "bad SBOL"),
            other => panic!("expected EngineInvocation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multi_output_resolves_top_module_by_suffix() {
        let fx = fixture().await;
        let (_, adapter) = adapter(ScriptedEngine::writing(&[
            ("LacI_inverter.xml", "<sbml/>"),
            ("Circuit0x8E_topModule.xml", "<sbml/>"),
            ("TetR_inverter.xml", "<sbml/>"),
        ]));

        let result = adapter
            .convert(&fx.input, &fx.workdir, &ParameterSet::new(), ConversionTarget::TopModulePath)
            .await
            .unwrap();

        assert_eq!(result.module_count(), 3);
        assert_eq!(
            result.model_path(),
            Some(fx.workdir.converted().join("Circuit0x8E_topModule.xml").as_path())
        );
    }

    #[tokio::test]
    async fn test_top_model_id_beats_suffix() {
        let fx = fixture().await;
        let (_, adapter) = adapter(ScriptedEngine::writing(&[
            ("A_topModule.xml", "<sbml/>"),
            ("Chosen.xml", "<sbml/>"),
        ]));
        let mut params = ParameterSet::new();
        params.insert(TOP_MODEL_ID, ParamValue::Text("Chosen".to_string()));

        let result = adapter
            .convert(&fx.input, &fx.workdir, &params, ConversionTarget::TopModulePath)
            .await
            .unwrap();
        assert_eq!(
            result.model_path(),
            Some(fx.workdir.converted().join("Chosen.xml").as_path())
        );
    }

    #[tokio::test]
    async fn test_unmatched_top_module_is_explicit_error() {
        let fx = fixture().await;
        let (_, adapter) = adapter(ScriptedEngine::writing(&[("a.xml", "<sbml/>"), ("b.xml", "<sbml/>")]));

        match adapter
            .convert(&fx.input, &fx.workdir, &ParameterSet::new(), ConversionTarget::TopModulePath)
            .await
        {
            Err(PipelineError::UnresolvedTopModule { candidates, top_model_id }) => {
                assert_eq!(candidates, vec!["a.xml", "b.xml"]);
                assert!(top_model_id.is_none());
            }
            other => panic!("expected UnresolvedTopModule, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multi_output_full_archive_has_five_entries() {
        let fx = fixture().await;
        let (_, adapter) = adapter(ScriptedEngine::writing(&[
            ("m1.xml", "<sbml/>"),
            ("m2.xml", "<sbml/>"),
            ("m3_topModule.xml", "<sbml/>"),
        ]));

        let result = adapter
            .convert(&fx.input, &fx.workdir, &ParameterSet::new(), ConversionTarget::Archive)
            .await
            .unwrap();

        let ConversionResult::MultiArchive {
            output: MultiOutput::Combine(archive),
            ..
        } = result
        else {
            panic!("expected a COMBINE archive");
        };
        let entries = archive::list_entries(archive.path()).unwrap();
        assert_eq!(entries.len(), 5);
        assert!(entries.contains(&"manifest.xml".to_string()));
        assert!(entries.contains(&"metadata.rdf".to_string()));
    }

    #[tokio::test]
    async fn test_request_parameters_replace_default_prefix() {
        let fx = fixture().await;
        let engine = ScriptedEngine::new(|inv| {
            write_outputs(inv, &[("x.xml".to_string(), "<sbml/>".to_string())])?;
            Ok(EngineOutcome::succeeded(""))
        });
        let (engine, adapter) = adapter(engine);
        let params = CONVERSION_PARAMETERS.process([("uriPrefix", "http://lab.example/")]);

        adapter
            .convert(&fx.input, &fx.workdir, &params, ConversionTarget::Archive)
            .await
            .unwrap();

        let args = engine.invocations()[0].args.clone();
        assert_eq!(args.iter().filter(|a| *a == "-p").count(), 1);
        let p = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[p + 1], "http://lab.example/");
        assert!(args.contains(&crate::config::DEFAULT_REPOSITORY.to_string()));
    }

    #[tokio::test]
    async fn test_configured_defaults_fill_missing_prefix_and_repository() {
        let fx = fixture().await;
        let engine = Arc::new(ScriptedEngine::writing(&[("x.xml", "<sbml/>")]));
        let config = EngineConfig {
            uri_prefix: "http://lab.example/".to_string(),
            repository: "https://parts.example/".to_string(),
            ..EngineConfig::direct("converter")
        };
        let adapter = ConversionAdapter::new(engine.clone(), config);

        adapter
            .convert(&fx.input, &fx.workdir, &ParameterSet::new(), ConversionTarget::Archive)
            .await
            .unwrap();

        let args = engine.invocations()[0].args.clone();
        assert_eq!(
            &args[..7],
            &["-i", "-l", "SBML", "-p", "http://lab.example/", "-r", "https://parts.example/"]
        );
    }

    #[test]
    fn test_resolve_top_module_accepts_full_file_name() {
        let modules = vec![PathBuf::from("/o/a.xml"), PathBuf::from("/o/b.xml")];
        assert_eq!(
            resolve_top_module(&modules, Some("b.xml")),
            Some(PathBuf::from("/o/b.xml"))
        );
        assert_eq!(resolve_top_module(&modules, Some("c")), None);
    }
}
