//! Single-page PDF diagnosis reports.

use crate::core::DiagnosisError;
use crate::domain::{KnowledgeEntry, PredictionResult};
use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 50.0;

const TITLE_SIZE: f32 = 20.0;
const HEADING_SIZE: f32 = 14.0;
const BODY_SIZE: f32 = 11.0;
const SMALL_SIZE: f32 = 9.0;
const LINE_HEIGHT: f32 = 15.0;
/// Lowest baseline body text may use; the footer sits below it.
const TEXT_FLOOR: f32 = MARGIN + LINE_HEIGHT;
/// Helvetica at body size fits roughly this many characters in the text column.
const WRAP_COLUMNS: usize = 88;

const IMAGE_BOX: f32 = 220.0;
const IMAGE_TOP: f32 = 750.0;

/// One percent of confidence is this many points of bar.
const BAR_SCALE: f32 = 3.0;
const BAR_HEIGHT: f32 = 12.0;
const BAR_FILL: [f32; 3] = [0.18, 0.62, 0.27];
const BAR_TRACK: [f32; 3] = [0.85, 0.85, 0.85];

/// Everything a report shows.
#[derive(Debug, Clone)]
pub struct ReportRecord {
    pub prediction: PredictionResult,
    pub knowledge: KnowledgeEntry,
    /// Source image, shown when it exists and decodes.
    pub image: Option<PathBuf>,
    pub generated_at: DateTime<Utc>,
}

impl ReportRecord {
    pub fn new(prediction: PredictionResult, knowledge: KnowledgeEntry) -> Self {
        Self {
            prediction,
            knowledge,
            image: None,
            generated_at: Utc::now(),
        }
    }

    pub fn with_image(mut self, image: impl Into<PathBuf>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Checks the fields every report must have.
    pub fn validate(&self) -> Result<(), DiagnosisError> {
        if self.prediction.label.trim().is_empty() {
            return Err(DiagnosisError::missing_report_field("label"));
        }
        let confidence = self.prediction.confidence;
        if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
            return Err(DiagnosisError::missing_report_field("confidence"));
        }
        if self.knowledge.description.trim().is_empty() {
            return Err(DiagnosisError::missing_report_field("description"));
        }
        if self.knowledge.remedy.trim().is_empty() {
            return Err(DiagnosisError::missing_report_field("remedy"));
        }
        Ok(())
    }
}

/// Renders [`ReportRecord`]s as A4 PDF documents.
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    title: String,
    footer: String,
}

impl Default for ReportRenderer {
    fn default() -> Self {
        Self {
            title: "Plant Disease Detection Report".to_string(),
            footer: "Generated automatically from a single leaf photograph. \
                     Confirm with an agricultural expert before treatment."
                .to_string(),
        }
    }
}

impl ReportRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Renders the record to PDF bytes.
    ///
    /// The record is validated before anything is drawn.
    pub fn render(&self, record: &ReportRecord) -> Result<Vec<u8>, DiagnosisError> {
        record.validate()?;

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
        });

        let mut ops = Vec::new();
        let mut y = PAGE_HEIGHT - MARGIN - TITLE_SIZE;

        text(&mut ops, "F2", TITLE_SIZE, MARGIN, y, &self.title);
        y -= LINE_HEIGHT + 4.0;
        let generated = format!(
            "Generated: {}",
            record.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        text(&mut ops, "F1", SMALL_SIZE, MARGIN, y, &generated);

        let mut xobjects = lopdf::Dictionary::new();
        y = IMAGE_TOP - IMAGE_BOX;
        if let Some((image_id, w, h)) = record.image.as_deref().and_then(|p| embed_image(&mut doc, p)) {
            xobjects.set("Im1", image_id);
            ops.push(Operation::new("q", vec![]));
            ops.push(Operation::new(
                "cm",
                vec![
                    w.into(),
                    0.into(),
                    0.into(),
                    h.into(),
                    MARGIN.into(),
                    (IMAGE_TOP - h).into(),
                ],
            ));
            ops.push(Operation::new("Do", vec!["Im1".into()]));
            ops.push(Operation::new("Q", vec![]));
        }
        y -= 2.0 * LINE_HEIGHT;

        let diagnosis = format!("Diagnosis: {}", record.prediction.label);
        text(&mut ops, "F2", HEADING_SIZE, MARGIN, y, &diagnosis);
        y -= LINE_HEIGHT + 4.0;
        let confidence = format!("Confidence: {:.2}%", record.prediction.confidence);
        text(&mut ops, "F1", BODY_SIZE, MARGIN, y, &confidence);
        y -= LINE_HEIGHT + BAR_HEIGHT;

        confidence_bar(&mut ops, MARGIN, y, record.prediction.confidence);
        y -= 2.0 * LINE_HEIGHT;

        for (field, heading, body) in [
            ("description", "Description", &record.knowledge.description),
            ("remedy", "Recommended remedy", &record.knowledge.remedy),
        ] {
            text(&mut ops, "F2", HEADING_SIZE, MARGIN, y, heading);
            y -= LINE_HEIGHT + 2.0;
            let lines = wrap_text(body, WRAP_COLUMNS);
            let available = lines_available(y);
            if lines.len() > available {
                return Err(DiagnosisError::report_overflow(field, lines.len(), available));
            }
            for line in lines {
                text(&mut ops, "F1", BODY_SIZE, MARGIN, y, &line);
                y -= LINE_HEIGHT;
            }
            y -= LINE_HEIGHT;
        }

        text(&mut ops, "F1", SMALL_SIZE, MARGIN, MARGIN - 10.0, &self.footer);

        let content = Content { operations: ops };
        let encoded = content
            .encode()
            .map_err(|e| DiagnosisError::report_encoding(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
                "F2" => bold_id,
            },
            "XObject" => xobjects,
        });
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| DiagnosisError::report_encoding(e.to_string()))?;

        debug!(label = %record.prediction.label, size = bytes.len(), "report rendered");
        Ok(bytes)
    }

    /// Renders the record into `dir` under a fresh `report-<uuid>.pdf` name.
    pub fn render_to_dir(
        &self,
        record: &ReportRecord,
        dir: impl AsRef<Path>,
    ) -> Result<PathBuf, DiagnosisError> {
        let bytes = self.render(record)?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("report-{}.pdf", uuid::Uuid::new_v4()));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

fn text(ops: &mut Vec<Operation>, font: &str, size: f32, x: f32, y: f32, value: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.into(), size.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new(
        "Tj",
        vec![Object::string_literal(to_latin1(value))],
    ));
    ops.push(Operation::new("ET", vec![]));
}

/// Body lines that fit from baseline `y` down to [`TEXT_FLOOR`].
fn lines_available(y: f32) -> usize {
    if y < TEXT_FLOOR {
        0
    } else {
        ((y - TEXT_FLOOR) / LINE_HEIGHT).floor() as usize + 1
    }
}

fn confidence_bar(ops: &mut Vec<Operation>, x: f32, y: f32, percent: f32) {
    let [r, g, b] = BAR_TRACK;
    ops.push(Operation::new("RG", vec![r.into(), g.into(), b.into()]));
    ops.push(Operation::new(
        "re",
        vec![x.into(), y.into(), (100.0 * BAR_SCALE).into(), BAR_HEIGHT.into()],
    ));
    ops.push(Operation::new("S", vec![]));

    let [r, g, b] = BAR_FILL;
    ops.push(Operation::new("rg", vec![r.into(), g.into(), b.into()]));
    ops.push(Operation::new(
        "re",
        vec![x.into(), y.into(), (percent * BAR_SCALE).into(), BAR_HEIGHT.into()],
    ));
    ops.push(Operation::new("f", vec![]));
    ops.push(Operation::new("rg", vec![0.into(), 0.into(), 0.into()]));
}

/// Adds the image as an XObject scaled into the image box. Returns the object
/// id and the drawn width and height, or `None` when the file is missing or
/// not an image.
fn embed_image(doc: &mut Document, path: &Path) -> Option<(ObjectId, f32, f32)> {
    if !path.is_file() {
        debug!(path = %path.display(), "report image not found, omitting");
        return None;
    }
    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "report image unreadable, omitting");
            return None;
        }
    };

    let side = IMAGE_BOX as u32 * 2;
    let rgb = img.thumbnail(side, side).to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb.into_raw(),
    );
    let id = doc.add_object(stream);

    let scale = IMAGE_BOX / width.max(height) as f32;
    Some((id, width as f32 * scale, height as f32 * scale))
}

/// Greedy word wrap on character count.
fn wrap_text(value: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in value.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > columns {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// The standard Type1 fonts use a single-byte encoding; anything outside
/// Latin-1 is replaced.
fn to_latin1(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}
