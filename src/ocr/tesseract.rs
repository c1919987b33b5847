use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use super::preprocess::{downscale_for_ocr, restore_bbox};
use super::setup::{find_tessdata_dir, find_tesseract_executable};
use super::{OcrOptions, RawOcrItem, RawOcrPage, TextRecognizer};
use crate::cancel::CancelToken;
use crate::geometry::BBox;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

// TSV levels
const LEVEL_BLOCK: i32 = 2;
const LEVEL_LINE: i32 = 4;
const LEVEL_WORD: i32 = 5;

/// Runs the Tesseract CLI with TSV output.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
    language: String,
    timeout: Duration,
    max_side: u32,
}

impl TesseractRecognizer {
    /// Locates the executable and language data.
    pub fn discover(options: &OcrOptions) -> Result<Self> {
        let executable = find_tesseract_executable(options.tesseract_path.as_deref())?;
        let tessdata = find_tessdata_dir(options.tessdata_dir.as_deref(), &options.language);
        crate::log(&format!(
            "Tesseract at {} (tessdata: {})",
            executable.display(),
            tessdata
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "default".to_string())
        ));
        Ok(Self::new(executable, tessdata, options))
    }

    pub fn new(executable: PathBuf, tessdata: Option<PathBuf>, options: &OcrOptions) -> Self {
        Self {
            executable,
            tessdata,
            language: options.language.clone(),
            timeout: Duration::from_millis(options.timeout_ms),
            max_side: options.max_side,
        }
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &RgbaImage, cancel: &CancelToken) -> Result<RawOcrPage> {
        let (prepared, factor) = downscale_for_ocr(image, self.max_side);

        // Input, TSV output and stderr all live here and go away on drop
        let work_dir = TempDir::new().context("Failed to create OCR scratch directory")?;
        let input_path = work_dir.path().join("input.png");
        prepared
            .save(&input_path)
            .context("Failed to write OCR input image")?;

        let page = parse_tsv_output(&self.run_pass(&work_dir, &input_path, &PRIMARY_PASS, cancel)?, factor);
        if !page.blocks.is_empty() {
            return Ok(page);
        }

        crate::log("text: no blocks, retrying with alternate settings (psm 6)");
        let tsv = self.run_pass(&work_dir, &input_path, &RETRY_PASS, cancel)?;
        Ok(parse_tsv_output(&tsv, factor))
    }
}

impl TesseractRecognizer {
    /// Runs one Tesseract invocation and returns the raw TSV.
    fn run_pass(&self, work_dir: &TempDir, input: &Path, pass: &OcrPass, cancel: &CancelToken) -> Result<String> {
        // Tesseract appends .tsv to the output base
        let output_base = work_dir.path().join(pass.name);
        let stderr_path = work_dir.path().join(format!("{}.stderr", pass.name));
        let stderr_file = File::create(&stderr_path).context("Failed to create stderr capture")?;

        let mut command = Command::new(&self.executable);
        command.arg(input).arg(&output_base);
        if let Some(dir) = &self.tessdata {
            command.arg("--tessdata-dir").arg(dir);
        }
        command
            .arg("-l")
            .arg(&self.language)
            .args(pass.args())
            .arg("tsv")
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_file));

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start {}", self.executable.display()))?;
        let status = wait_with_deadline(&mut child, self.timeout, cancel)?;

        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(anyhow!("Tesseract failed ({}): {}", status, stderr.trim()));
        }

        let tsv_path = output_base.with_extension("tsv");
        std::fs::read_to_string(&tsv_path).map_err(|e| anyhow!("Failed to read Tesseract output: {}", e))
    }
}

/// Settings for one recognition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OcrPass {
    name: &'static str,
    psm: u8,
    dpi: Option<u32>,
}

impl OcrPass {
    fn args(&self) -> Vec<String> {
        let mut args = vec!["--psm".to_string(), self.psm.to_string()];
        if let Some(dpi) = self.dpi {
            args.push("--dpi".to_string());
            args.push(dpi.to_string());
        }
        args.push("-c".to_string());
        args.push("preserve_interword_spaces=1".to_string());
        args
    }
}

/// Fully automatic page segmentation.
const PRIMARY_PASS: OcrPass = OcrPass {
    name: "primary",
    psm: 3,
    dpi: None,
};

/// Single uniform text block at a fixed resolution, for pages the automatic
/// segmentation finds nothing in.
const RETRY_PASS: OcrPass = OcrPass {
    name: "retry",
    psm: 6,
    dpi: Some(220),
};

/// Polls the child until it exits, killing it on timeout or cancellation.
fn wait_with_deadline(child: &mut Child, timeout: Duration, cancel: &CancelToken) -> Result<ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("OCR cancelled"));
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("Tesseract timed out after {}ms", timeout.as_millis()));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

struct TsvRow {
    level: i32,
    block: i32,
    par: i32,
    line: i32,
    bbox: Option<BBox>,
    confidence: f64,
    text: String,
}

fn parse_row(line: &str) -> Option<TsvRow> {
    // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
    //             left, top, width, height, conf, text
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 12 {
        return None;
    }
    let num = |i: usize| fields[i].trim().parse::<f64>().ok();
    let bbox = match (num(6), num(7), num(8), num(9)) {
        (Some(x), Some(y), Some(w), Some(h)) => BBox::new(x, y, w, h).ok(),
        _ => None,
    };
    Some(TsvRow {
        level: fields[0].trim().parse().ok()?,
        block: fields[2].trim().parse().unwrap_or(-1),
        par: fields[3].trim().parse().unwrap_or(-1),
        line: fields[4].trim().parse().unwrap_or(-1),
        bbox,
        confidence: num(10).unwrap_or(-1.0),
        text: fields[11].trim().to_string(),
    })
}

#[derive(Default)]
struct Group {
    bbox: Option<BBox>,
    words: Vec<String>,
    confidences: Vec<f64>,
}

impl Group {
    fn item(&self, text: String, factor: f64) -> RawOcrItem {
        RawOcrItem {
            text,
            confidence: crate::stats::mean(&self.confidences),
            bbox: self.bbox.map(|b| restore_bbox(b, factor)),
        }
    }
}

/// Parses Tesseract TSV into block, line and word tiers.
///
/// Block and line confidences are the mean of their words. Boxes are mapped
/// back through `factor` to source coordinates.
fn parse_tsv_output(tsv: &str, factor: f64) -> RawOcrPage {
    let mut blocks: BTreeMap<i32, Group> = BTreeMap::new();
    let mut lines: BTreeMap<(i32, i32, i32), Group> = BTreeMap::new();
    let mut words = Vec::new();

    // Skip header
    for row in tsv.lines().skip(1).filter_map(parse_row) {
        let line_key = (row.block, row.par, row.line);
        match row.level {
            LEVEL_BLOCK => blocks.entry(row.block).or_default().bbox = row.bbox,
            LEVEL_LINE => lines.entry(line_key).or_default().bbox = row.bbox,
            LEVEL_WORD if !row.text.is_empty() && row.confidence >= 0.0 => {
                for group in [
                    blocks.entry(row.block).or_default(),
                    lines.entry(line_key).or_default(),
                ] {
                    group.words.push(row.text.clone());
                    group.confidences.push(row.confidence);
                }
                words.push(RawOcrItem {
                    text: row.text,
                    confidence: row.confidence,
                    bbox: row.bbox.map(|b| restore_bbox(b, factor)),
                });
            }
            _ => {}
        }
    }

    let line_items: Vec<(i32, RawOcrItem)> = lines
        .iter()
        .filter(|(_, g)| !g.words.is_empty())
        .map(|(key, g)| (key.0, g.item(g.words.join(" "), factor)))
        .collect();

    let block_items: Vec<RawOcrItem> = blocks
        .iter()
        .filter(|(_, g)| !g.words.is_empty())
        .map(|(block, g)| {
            let text = line_items
                .iter()
                .filter(|(b, _)| b == block)
                .map(|(_, l)| l.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            g.item(text, factor)
        })
        .collect();

    let text = block_items
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let confidences: Vec<f64> = words.iter().map(|w| w.confidence).collect();

    RawOcrPage {
        text,
        confidence: crate::stats::mean(&confidences),
        blocks: block_items,
        lines: line_items.into_iter().map(|(_, l)| l).collect(),
        words,
    }
}
