//! End-to-end pipeline runs against a scripted engine.
//!
//! Every supported input kind must come back with at least one run file,
//! and the engine's under-reported failures must still surface as errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use simbridge_core::archive::{list_entries, zip_directory};
use simbridge_core::engine::EngineOutcome;
use simbridge_core::fakes::{analysis_files, is_conversion, write_outputs, ScriptedEngine};
use simbridge_core::{
    AnalyzeRequest, ConvertRequest, Dispatcher, EngineConfig, PipelineConfig, PipelineError,
    PipelineStage, Selection, Verification, ANALYSIS_PARAMETERS,
};

const SBOL_DOC: &str = r#"<?xml version="1.0" ?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:sbol="http://sbols.org/v2#">
  <sbol:ModuleDefinition rdf:about="http://example.org/Circuit0x8E"/>
</rdf:RDF>
"#;

const SBML_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sbml xmlns="http://www.sbml.org/sbml/level3/version2/core" level="3" version="2">
  <model id="SimpleReaction"/>
</sbml>
"#;

const TSD: &str = "((\"time\", \"S1\"), (0.0, 100.0), (1.0, 98.0))";

struct Harness {
    base: tempfile::TempDir,
    engine: Arc<ScriptedEngine>,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new(engine: ScriptedEngine) -> Self {
        let base = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine);
        let config = PipelineConfig::new(EngineConfig::direct("engine"), base.path().join("work"));
        let dispatcher = Dispatcher::new(config, engine.clone());
        Self {
            base,
            engine,
            dispatcher,
        }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.base.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn archive(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let src = self.base.path().join(format!("{name}-src"));
        std::fs::create_dir_all(&src).unwrap();
        for (file, contents) in files {
            std::fs::write(src.join(file), contents).unwrap();
        }
        let dest = self.base.path().join(name);
        zip_directory(&src, &Selection::All, &dest).unwrap();
        dest
    }
}

/// Converter writes `modules`; simulator writes a sentinel and `runs` run files.
fn engine(modules: Vec<&'static str>, runs: usize, run_body: &'static str) -> ScriptedEngine {
    ScriptedEngine::new(move |inv| {
        if is_conversion(inv) {
            let files: Vec<(String, String)> = modules
                .iter()
                .map(|m| (m.to_string(), SBML_DOC.to_string()))
                .collect();
            write_outputs(inv, &files)?;
        } else {
            write_outputs(inv, &analysis_files(runs, run_body))?;
        }
        Ok(EngineOutcome::succeeded("engine finished"))
    })
}

fn run_files(archive: &Path) -> Vec<String> {
    list_entries(archive)
        .unwrap()
        .into_iter()
        .filter(|e| e.ends_with(".tsd"))
        .collect()
}

#[tokio::test]
async fn genetic_design_single_module_produces_runs() {
    let h = Harness::new(engine(vec!["Circuit0x8E.xml"], 1, TSD));
    let input = h.write("Circuit0x8E.sbol", SBOL_DOC);

    let output = h.dispatcher.analyze(AnalyzeRequest::new(&input)).await.unwrap();

    assert_eq!(run_files(&output.deliverable.path), vec!["run-1.tsd"]);
    let calls = h.engine.invocations();
    assert_eq!(calls.len(), 2);
    assert!(calls[1]
        .input_path()
        .unwrap()
        .ends_with("converted/Circuit0x8E.xml"));
}

#[tokio::test]
async fn genetic_design_multi_module_analyzes_top_module() {
    let h = Harness::new(engine(
        vec!["LacI_inverter.xml", "Circuit0x8E_topModule.xml", "TetR_inverter.xml"],
        2,
        TSD,
    ));
    let input = h.write("Circuit0x8E.sbol", SBOL_DOC);

    let output = h.dispatcher.analyze(AnalyzeRequest::new(&input)).await.unwrap();

    assert_eq!(run_files(&output.deliverable.path).len(), 2);
    let analysed = h.engine.invocations()[1].input_path().unwrap();
    assert!(analysed.ends_with("Circuit0x8E_topModule.xml"));
}

#[tokio::test]
async fn genetic_design_multi_module_honours_top_model_id() {
    let h = Harness::new(engine(vec!["A_topModule.xml", "B.xml"], 1, TSD));
    let input = h.write("design.sbol", SBOL_DOC);

    h.dispatcher
        .analyze(AnalyzeRequest::new(&input).with_field("topModelId", "B.xml"))
        .await
        .unwrap();

    let analysed = h.engine.invocations()[1].input_path().unwrap();
    assert!(analysed.ends_with("B.xml"));
}

#[tokio::test]
async fn multi_module_without_top_module_is_unresolved() {
    let h = Harness::new(engine(vec!["A.xml", "B.xml"], 1, TSD));
    let input = h.write("design.sbol", SBOL_DOC);

    let err = h
        .dispatcher
        .analyze(AnalyzeRequest::new(&input))
        .await
        .unwrap_err();

    match err {
        PipelineError::UnresolvedTopModule { candidates, .. } => {
            assert_eq!(candidates, vec!["A.xml", "B.xml"]);
        }
        other => panic!("expected UnresolvedTopModule, got {:?}", other),
    }
    assert_eq!(h.engine.invocations().len(), 1);
}

#[tokio::test]
async fn model_exchange_is_analyzed_directly() {
    let h = Harness::new(engine(vec![], 3, TSD));
    let input = h.write("SimpleReaction.xml", SBML_DOC);

    let output = h
        .dispatcher
        .analyze(
            AnalyzeRequest::new(&input)
                .with_field("runs", "3")
                .with_field("simulationType", "SSA"),
        )
        .await
        .unwrap();

    assert_eq!(run_files(&output.deliverable.path).len(), 3);
    let calls = h.engine.invocations();
    assert_eq!(calls.len(), 1);
    let decoded = ANALYSIS_PARAMETERS.decode_args(&calls[0].args);
    assert_eq!(decoded.text("simulationType"), Some("ssa"));
}

#[tokio::test]
async fn archive_without_environment_is_analyzed_directly() {
    let h = Harness::new(engine(vec![], 1, TSD));
    let input = h.archive("SimpleReaction.omex", &[("model.xml", SBML_DOC)]);

    let output = h.dispatcher.analyze(AnalyzeRequest::new(&input)).await.unwrap();

    assert!(!run_files(&output.deliverable.path).is_empty());
    let analysed = h.engine.invocations()[0].input_path().unwrap();
    assert_eq!(analysed.file_name().unwrap(), "input.omex");
}

#[tokio::test]
async fn environment_descriptor_overrides_primary_input() {
    let h = Harness::new(engine(vec!["never.xml"], 1, TSD));
    let input = h.write("Circuit0x8E.sbol", SBOL_DOC);
    let environment = h.archive(
        "environment.omex",
        &[("simulation.sedml", "<sedML/>"), ("model.xml", SBML_DOC)],
    );

    let output = h
        .dispatcher
        .analyze(AnalyzeRequest::new(&input).with_environment(&environment))
        .await
        .unwrap();

    assert!(!output.trace.contains(&PipelineStage::Converting));
    let calls = h.engine.invocations();
    assert_eq!(calls.len(), 1);
    let target = calls[0].input_path().unwrap();
    assert!(target.ends_with("outputs/simulation.sedml"));
    assert!(!run_files(&output.deliverable.path).is_empty());
}

#[tokio::test]
async fn missing_sentinel_is_never_success() {
    let h = Harness::new(ScriptedEngine::new(|inv| {
        write_outputs(inv, &[("run-1.tsd".to_string(), TSD.to_string())])?;
        Ok(EngineOutcome::succeeded("exit 0"))
    }));
    let input = h.write("SimpleReaction.xml", SBML_DOC);

    let err = h
        .dispatcher
        .analyze(AnalyzeRequest::new(&input).with_field("runs", "abc"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::UnexpectedOutput { .. }));
    assert_eq!(err.to_body().kind, "unexpected_output");
}

#[tokio::test]
async fn nan_results_succeed_with_warning() {
    let h = Harness::new(engine(vec![], 1, "(0.0, NaN), (1.0, nan)"));
    let input = h.write("SimpleReaction.xml", SBML_DOC);

    let output = h.dispatcher.analyze(AnalyzeRequest::new(&input)).await.unwrap();

    assert!(matches!(output.verification, Some(Verification::Suspect(_))));
    assert_eq!(output.trace.last(), Some(&PipelineStage::Packaged));
}

#[tokio::test]
async fn non_utf8_run_file_is_still_verified() {
    let h = Harness::new(ScriptedEngine::new(|inv| {
        write_outputs(inv, &analysis_files(0, ""))?;
        if let Some(dir) = inv.out_dir() {
            std::fs::write(dir.join("run-1.tsd"), b"((\"T \xb0C\"), (0.0, 21.5))\n")?;
        }
        Ok(EngineOutcome::succeeded("engine finished"))
    }));
    let input = h.write("SimpleReaction.xml", SBML_DOC);

    let output = h.dispatcher.analyze(AnalyzeRequest::new(&input)).await.unwrap();

    assert_eq!(output.verification, Some(Verification::Verified));
    assert_eq!(output.trace.last(), Some(&PipelineStage::Packaged));
}

#[tokio::test]
async fn full_trace_for_converted_analysis() {
    let h = Harness::new(engine(vec!["only.xml"], 1, TSD));
    let input = h.write("design.sbol", SBOL_DOC);

    let output = h.dispatcher.analyze(AnalyzeRequest::new(&input)).await.unwrap();

    assert_eq!(
        output.trace,
        vec![
            PipelineStage::Received,
            PipelineStage::Classified,
            PipelineStage::Converting,
            PipelineStage::Analyzing,
            PipelineStage::Verified,
            PipelineStage::Packaged,
        ]
    );
}

#[tokio::test]
async fn convert_three_modules_yields_five_entry_archive() {
    let h = Harness::new(engine(vec!["m1.xml", "m2.xml", "m3_topModule.xml"], 0, TSD));
    let input = h.write("Circuit0x8E.sbol", SBOL_DOC);

    let output = h.dispatcher.convert(ConvertRequest::new(&input)).await.unwrap();

    assert_eq!(output.deliverable.file_name, "converted.omex");
    assert_eq!(output.deliverable.content_type, "application/zip");
    let mut entries = list_entries(&output.deliverable.path).unwrap();
    entries.sort();
    assert_eq!(
        entries,
        vec![
            "m1.xml",
            "m2.xml",
            "m3_topModule.xml",
            "manifest.xml",
            "metadata.rdf"
        ]
    );
}

#[tokio::test]
async fn convert_with_no_output_fails() {
    let h = Harness::new(engine(vec![], 0, TSD));
    let input = h.write("empty.sbol", SBOL_DOC);

    let err = h
        .dispatcher
        .convert(ConvertRequest::new(&input))
        .await
        .unwrap_err();

    match err {
        PipelineError::NoOutput { stdout } => assert_eq!(stdout, "engine finished"),
        other => panic!("expected NoOutput, got {:?}", other),
    }
}

#[tokio::test]
async fn concurrent_requests_use_distinct_working_directories() {
    let h = Harness::new(engine(vec![], 1, TSD));
    let input = h.write("same-name.xml", SBML_DOC);

    let (a, b) = tokio::join!(
        h.dispatcher.analyze(AnalyzeRequest::new(&input)),
        h.dispatcher.analyze(AnalyzeRequest::new(&input)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.request_id, b.request_id);
    assert_ne!(a.deliverable.path, b.deliverable.path);
}
