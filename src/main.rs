//! UI Perception command line
//!
//! Usage: `ui-perception <image> [--ocr regions.json] [--config cfg.json]
//! [--viewport px] [--facts]`
//!
//! Prints the perception result as JSON. With `--facts` the id-anchored
//! transcript and its allow-list follow.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

use ui_perception::ocr::{NullRecognizer, TesseractRecognizer, TextRecognizer};
use ui_perception::{build_facts, log, paths, Engine, EngineConfig, ImageInput, OcrRegionWire, Stage};

struct Args {
    image: PathBuf,
    ocr_regions: Option<PathBuf>,
    config: Option<PathBuf>,
    viewport_height: Option<u32>,
    facts: bool,
}

fn parse_args() -> Result<Args> {
    let mut image = None;
    let mut ocr_regions = None;
    let mut config = None;
    let mut viewport_height = None;
    let mut facts = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ocr" => ocr_regions = Some(PathBuf::from(args.next().ok_or_else(|| anyhow!("--ocr needs a path"))?)),
            "--config" => config = Some(PathBuf::from(args.next().ok_or_else(|| anyhow!("--config needs a path"))?)),
            "--viewport" => {
                let value = args.next().ok_or_else(|| anyhow!("--viewport needs a height"))?;
                viewport_height = Some(value.parse().with_context(|| format!("Invalid viewport height: {}", value))?);
            }
            "--facts" => facts = true,
            other if other.starts_with("--") => return Err(anyhow!("Unknown option: {}", other)),
            other => image = Some(PathBuf::from(other)),
        }
    }

    Ok(Args {
        image: image.ok_or_else(|| {
            anyhow!("Usage: ui-perception <image> [--ocr regions.json] [--config cfg.json] [--viewport px] [--facts]")
        })?,
        ocr_regions,
        config,
        viewport_height,
        facts,
    })
}

fn main() -> Result<()> {
    // Set up panic hook to log panics
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = if let Some(loc) = panic_info.location() {
            format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column())
        } else {
            String::new()
        };
        log(&format!("[PANIC]{} {}", location, msg));
    }));

    let args = parse_args()?;

    // Ensure output directories exist
    paths::ensure_directories()?;

    let config_path = args.config.clone().unwrap_or_else(paths::get_default_config_path);
    let mut config = EngineConfig::load(&config_path);
    if config.ocr.tessdata_dir.is_none() {
        // Honor the standard Tesseract variable when the config names no dir
        config.ocr.tessdata_dir = std::env::var_os("TESSDATA_PREFIX").map(PathBuf::from);
    }

    let recognizer: Box<dyn TextRecognizer> = match TesseractRecognizer::discover(&config.ocr) {
        Ok(recognizer) => Box::new(recognizer),
        Err(e) => {
            log(&format!("Warning: {}", e));
            log("Text extraction will be empty.");
            Box::new(NullRecognizer)
        }
    };

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("Failed to read image {}", args.image.display()))?;
    let ocr_regions = match &args.ocr_regions {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read OCR regions {}", path.display()))?;
            let regions: Vec<OcrRegionWire> = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse OCR regions {}", path.display()))?;
            Some(regions)
        }
        None => None,
    };

    let input = ImageInput {
        bytes,
        ocr_regions,
        viewport_height: args.viewport_height,
    };

    let engine = Engine::new(config, recognizer);
    let progress = |stage: Stage, pct: u8| log(&format!("Progress: {} {}%", stage.as_str(), pct));
    let result = engine.perceive(&input, Some(&progress))?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if args.facts {
        let facts = build_facts(&result);
        println!();
        println!("{}", facts.text());
        println!();
        println!(
            "allowed ids: {}",
            facts.allowed_ids().iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }

    Ok(())
}
