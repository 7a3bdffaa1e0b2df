// ============================================================================
// Glitchy CLI: headless glitching via command-line arguments
// ============================================================================
//
// Usage examples:
//   glitchy -i photo.png -e invert:0xff -o out.png
//   glitchy -i photo.jpg -e bitshift:24,8 -e sort:-1 --selection 0:50000 -o out.png
//   glitchy -i a.png b.png --render-type difference -o diff.png --project both.glp
//   glitchy -i dump.bin --raw --alpha -e smear:100,10 -o raw.png
//   glitchy --open both.glp -e shuffle:0xff0000 -o reshuffled.png
//
// Every input becomes one layer of a single canvas; effects are applied to
// each newly imported layer in the order given, then the composite is written.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::{RenderProperties, RenderType};
use crate::io::ExportFormat;
use crate::ops::EffectKind;
use crate::project::Project;
use crate::settings::AppSettings;
use crate::stream::StreamId;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Glitchy headless glitch-art renderer.
#[derive(Parser, Debug)]
#[command(
    name = "glitchy",
    about = "Glitchy headless glitch-art renderer",
    long_about = "Import images or raw files as layers, apply pixel effects and write\n\
                  the composite without opening an editor.\n\n\
                  Effects are given as KIND:MODIFIERS, modifiers comma separated,\n\
                  decimal or 0x-prefixed hex:\n  \
                  bitshift:BITS,SHIFT   invert:MASK[,MASK..]   reorder:A,R,G,B\n  \
                  shuffle:-1|MASK..     smear:LENGTH,INTENSITY sort:-1|MASK.."
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "dumps/*.bin").
    #[arg(short, long, num_args = 1.., required_unless_present = "open")]
    pub input: Vec<String>,

    /// Load a .glp project before importing inputs.
    #[arg(long, value_name = "PROJECT.glp")]
    pub open: Option<PathBuf>,

    /// Read inputs as raw bytes instead of decoding them.
    #[arg(long)]
    pub raw: bool,

    /// Raw inputs use 4-byte ARGB groups instead of 3-byte RGB.
    #[arg(long)]
    pub alpha: bool,

    /// Selection START:END applied to every imported layer before effects.
    #[arg(long, value_name = "START:END")]
    pub selection: Option<String>,

    /// Effect to apply, repeatable. Applied in order.
    #[arg(short, long = "effect", value_name = "KIND:MODIFIERS")]
    pub effects: Vec<String>,

    /// Canvas width (defaults to the first layer's width).
    #[arg(long)]
    pub width: Option<u32>,

    /// Canvas height (defaults to the first layer's height).
    #[arg(long)]
    pub height: Option<u32>,

    /// Merge operator: sum, or, difference, average (or 0-3).
    #[arg(short, long, value_name = "TYPE")]
    pub render_type: Option<String>,

    /// Output image path. Defaults to `<first input>_glitched.png`.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format: png, jpeg, webp, bmp, tga, tiff, gif, ico.
    /// When omitted, the format is inferred from --output's extension, defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Also save the session as a .glp project.
    #[arg(long, value_name = "PROJECT.glp")]
    pub project: Option<PathBuf>,

    /// Settings file to use instead of the per-user one.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Keep compositing and effects on the calling thread.
    #[arg(long)]
    pub sequential: bool,

    /// Print the action log and timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the whole pipeline and return an OS exit code.
/// `0` = everything succeeded, `1` = any step failed.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();

    let selection = match args.selection.as_deref().map(parse_selection).transpose() {
        Ok(sel) => sel,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let effects =
        match args.effects.iter().map(|s| parse_effect_arg(s)).collect::<Result<Vec<_>, _>>() {
            Ok(list) => list,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        };
    let render_type = match args.render_type.as_deref().map(parse_render_type).transpose() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let format = match args.format.as_deref() {
        Some(f) => match ExportFormat::from_extension(f) {
            Some(fmt) => Some(fmt),
            None => {
                eprintln!("error: unknown output format '{}'.", f);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let mut settings = match &args.settings {
        Some(path) => AppSettings::load_from(path),
        None => AppSettings::load(),
    };
    if args.sequential {
        settings.parallel_render = false;
    }
    let alpha = args.alpha || settings.raw_alpha;
    let mut project = Project::new_untitled(1, settings);
    let mut any_failure = false;

    if let Some(path) = &args.open
        && !project.load_project(path)
    {
        eprintln!("error: could not load project '{}'.", path.display());
        return ExitCode::FAILURE;
    }

    // -- Step 1: Import --------------------------------------------------
    let inputs = resolve_inputs(&args.input);
    if !args.input.is_empty() && inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }
    let mut imported: Vec<StreamId> = Vec::new();
    for input in &inputs {
        let id = if args.raw {
            project.load_raw(input, alpha)
        } else {
            project.load_image(input)
        };
        match id {
            Some(id) => imported.push(id),
            None => {
                eprintln!("  error: could not import '{}'.", input.display());
                any_failure = true;
            }
        }
    }
    if project.canvas.is_empty() {
        eprintln!("error: nothing to render.");
        return ExitCode::FAILURE;
    }

    // -- Step 2: Effects -------------------------------------------------
    // Effects on an opened project without inputs go to every layer.
    let targets = if imported.is_empty() { project.canvas.ids() } else { imported };
    for &id in &targets {
        if let Some((start, end)) = selection {
            project.set_selection(id, start, end);
        }
        for (kind, modifiers) in &effects {
            if let Err(e) = project.apply_modifiers(id, *kind, modifiers) {
                eprintln!("  error: {} on layer {}: {}", kind, id, e);
                any_failure = true;
            }
        }
    }

    // -- Step 3: Canvas --------------------------------------------------
    if args.width.is_some() || args.height.is_some() || render_type.is_some() {
        let current = project.properties;
        project.set_render_properties(RenderProperties::new(
            args.width.unwrap_or(current.width),
            args.height.unwrap_or(current.height),
            render_type.unwrap_or(current.render_type),
        ));
    }

    // -- Step 4: Write ---------------------------------------------------
    let output = match output_path(args.output.as_deref(), inputs.first(), args.open.as_deref()) {
        Some(p) => p,
        None => {
            eprintln!("error: cannot determine an output path, use --output.");
            return ExitCode::FAILURE;
        }
    };
    match project.export_image(&output, format) {
        Ok(written) => println!("{}", written.display()),
        Err(e) => {
            eprintln!("error: export failed: {}", e);
            any_failure = true;
        }
    }

    if let Some(path) = &args.project
        && let Err(e) = project.save_project(path)
    {
        eprintln!("error: project save failed: {}", e);
        any_failure = true;
    }

    if args.verbose {
        for action in project.latest_actions().iter().rev() {
            println!("  {}", action);
        }
        for stream in project.canvas.streams() {
            println!("  {}:", stream.title);
            for effect in stream.effects() {
                println!("    {}", effect.describe());
            }
        }
        println!("  done in {:.0}ms", start.elapsed().as_secs_f64() * 1000.0);
    }

    project.close();
    match &args.settings {
        Some(path) => {
            if let Err(e) = project.settings.save_to(path) {
                crate::log_warn!("Could not save settings to {}: {}", path.display(), e);
            }
        }
        None => project.settings.save(),
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// `"invert:0xff,0xff00"` -> `(Invert, [255, 65280])`. A bare kind has no modifiers.
pub fn parse_effect_arg(arg: &str) -> Result<(EffectKind, Vec<i32>), String> {
    let (name, mods) = arg.split_once(':').unwrap_or((arg, ""));
    let kind = EffectKind::from_name(name.trim())
        .ok_or_else(|| format!("unknown effect '{}'", name.trim()))?;
    let modifiers = mods
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(parse_modifier)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((kind, modifiers))
}

/// Decimal `i32`, or `0x` hex reinterpreted as `i32` so full ARGB masks fit.
fn parse_modifier(text: &str) -> Result<i32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).map(|v| v as i32).ok(),
        None => text.parse::<i32>().ok(),
    };
    parsed.ok_or_else(|| format!("invalid modifier '{}'", text))
}

/// `"START:END"`, both signed; the stream normalises out-of-range values.
pub fn parse_selection(text: &str) -> Result<(i64, i64), String> {
    let (start, end) = text
        .split_once(':')
        .ok_or_else(|| format!("selection '{}' must look like START:END", text))?;
    let start = start.trim().parse().map_err(|_| format!("invalid selection start '{}'", start))?;
    let end = end.trim().parse().map_err(|_| format!("invalid selection end '{}'", end))?;
    Ok((start, end))
}

pub fn parse_render_type(text: &str) -> Result<RenderType, String> {
    RenderType::from_name(text)
        .or_else(|| text.parse().ok().and_then(RenderType::from_code))
        .ok_or_else(|| format!("unknown render type '{}'", text))
}

/// `--output`, else `<stem>_glitched.png` next to the first input (or the opened project).
fn output_path(output: Option<&Path>, first_input: Option<&PathBuf>, opened: Option<&Path>) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }
    let source = first_input.map(PathBuf::as_path).or(opened)?;
    let stem = source.file_stem()?.to_string_lossy().into_owned();
    let parent = source.parent().unwrap_or(Path::new("."));
    Some(parent.join(format!("{}_glitched.png", stem)))
}
