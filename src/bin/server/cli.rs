//! CLI mode for diagnosis.

use crate::diagnose::DiagnosisResponse;
use leafdx::core::{OrtInfer, PipelineConfig};
use leafdx::domain::{ClassVocabulary, KnowledgeTable, Verdict};
use leafdx::models::LeafClassifier;
use leafdx::pipeline::DiagnosisPipeline;
use leafdx::report::ReportRenderer;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Diagnose a local image file
pub fn diagnose_file(
    path: &Path,
    config: &PipelineConfig,
    report: Option<&Path>,
    output_format: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    info!("Initializing diagnosis pipeline...");
    let pipeline = DiagnosisPipeline::from_config(config)?;
    let init_time = start.elapsed();
    info!("Pipeline initialized in {:.2}ms", init_time.as_secs_f64() * 1000.0);

    info!("Diagnosing {}...", path.display());
    let diagnose_start = Instant::now();
    let diagnosis = pipeline.diagnose_path(path)?;
    let processing_time = diagnose_start.elapsed();
    info!("Diagnosis completed in {:.2}ms", processing_time.as_secs_f64() * 1000.0);

    let processing_ms = processing_time.as_secs_f64() * 1000.0;
    let image = path.to_string_lossy().into_owned();

    match output_format {
        "json" => {
            let response = DiagnosisResponse::from_diagnosis(&diagnosis, Some(image), processing_ms);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        _ => {
            println!("\n=== Diagnosis ===");
            println!("Image: {}", path.display());
            println!("Processing time: {:.2}ms", processing_ms);
            println!();
            match &diagnosis.verdict {
                Verdict::Diagnosed {
                    label,
                    confidence_percent,
                } => {
                    println!("Disease: {label}");
                    println!("Confidence: {confidence_percent:.2}%");
                }
                Verdict::Inconclusive => {
                    println!("Verdict: inconclusive");
                    println!(
                        "Best guess: {} ({:.2}%)",
                        diagnosis.prediction.label, diagnosis.prediction.confidence
                    );
                    if let Some(failure) = diagnosis.failure {
                        println!("Failure: {failure:?}");
                    }
                }
            }
            println!();
            println!("Description: {}", diagnosis.knowledge.description);
            println!("Remedy: {}", diagnosis.knowledge.remedy);
        }
    }

    if let Some(report_path) = report {
        if diagnosis.failure.is_some() {
            return Err("no report for a failed prediction".into());
        }
        let record = pipeline.report_record(&diagnosis, Some(path.to_path_buf()));
        let bytes = ReportRenderer::new().render(&record)?;
        std::fs::write(report_path, bytes)?;
        info!("Report written to {}", report_path.display());
    }

    Ok(())
}

/// Check that the model loads and matches the configured labels
pub fn check(config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    println!("=== leafdx installation check ===");

    let vocabulary = match &config.labels_path {
        Some(path) => ClassVocabulary::from_labels_file(path)?,
        None => ClassVocabulary::plant_village(),
    };
    println!("Classes: {}", vocabulary.len());

    let knowledge = match &config.knowledge_path {
        Some(path) => KnowledgeTable::from_json_file(path)?,
        None => KnowledgeTable::builtin(),
    };
    println!(
        "Knowledge entries: {} ({} of {} classes covered)",
        knowledge.len(),
        knowledge.coverage(&vocabulary),
        vocabulary.len()
    );
    for label in knowledge.unknown_labels(&vocabulary) {
        println!("  warning: entry '{label}' matches no class label");
    }

    println!("Model: {}", config.model_path.display());
    let model = OrtInfer::new(
        &config.model_path,
        config.session_pool_size,
        config.ort_session.as_ref(),
    )?;
    println!("  Input shape: {:?}", model.input_shape());
    println!("  Output shape: {:?}", model.output_shape());

    LeafClassifier::new(Arc::new(model), vocabulary.len(), config.input_size)?;

    println!("Model loaded successfully.");
    Ok(())
}
