//! ffmpeg invocation builder
//!
//! Produces the full argument vector for one master render: inputs, the
//! `-filter_complex` graph driven by synthesized expressions, and codec
//! settings from the render recipe. Arguments are discrete argv elements;
//! nothing is ever passed through a shell.

use crate::context::PipelineContext;
use crate::error::{Error, Result};
use crate::expression::{Expr, ExpressionBudget, ExpressionSynthesizer, Timeline, Var, ZoomParams};
use crate::types::Manifest;
use std::f64::consts::FRAC_PI_4;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything needed to run the engine once
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Arguments after the program name
    pub args: Vec<String>,
    /// File the engine writes
    pub output: PathBuf,
    /// Expected length of the output in seconds
    pub duration_seconds: f64,
    /// The `-filter_complex` value, kept for logging
    pub filter_graph: String,
}

/// Escape text for a `drawtext` value inside single quotes
///
/// Apostrophes cannot be escaped inside a quoted filter value, so they are
/// replaced with a typographic apostrophe.
pub fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ':' => out.push_str("\\:"),
            '%' => out.push_str("\\%"),
            '\'' => out.push('\u{2019}'),
            '\n' | '\r' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Round seconds for filter options
fn secs(v: f64) -> String {
    format!("{:.3}", v.max(0.0))
}

/// Build the render job for an analyzed manifest
pub fn build_job(manifest: &Manifest, ctx: &PipelineContext, output: &Path) -> Result<RenderJob> {
    let analysis = manifest.analysis().ok_or_else(|| Error::MissingAnalysis {
        song: manifest.key().to_string(),
    })?;
    let recipe = &ctx.recipe;
    let video = &recipe.video;
    let timing = &recipe.timing;
    let effects = &recipe.effects;
    let comp = &recipe.composition;

    let fps = video.fps;
    let (width, height) = (video.width, video.height);
    let intro = timing.intro_duration_seconds.max(0.0);
    let total = recipe.total_duration(analysis.duration_seconds);

    // Expressions
    let synth = ExpressionSynthesizer::with_budget(
        fps,
        ExpressionBudget {
            max_energy_segments: effects.max_energy_segments,
            max_bloom_beats: effects.max_bloom_beats,
        },
    );
    let curve = &analysis.energy_curve;
    let duration = analysis.duration_seconds;
    let energy_n = synth.energy_envelope(curve, duration, intro, Timeline::Frames(Var::Frame));
    let energy_on =
        synth.energy_envelope(curve, duration, intro, Timeline::Frames(Var::OutputFrame));
    let bloom = synth.beat_bloom(
        &analysis.beat_times,
        intro,
        effects.bloom_strength,
        effects.bloom_decay_frames,
        Var::Frame,
    );
    let [zoom_lo, zoom_hi] = recipe.ken_burns.zoom_range;
    let zoom = synth.zoom(
        &energy_on,
        ZoomParams {
            mid: (zoom_lo + zoom_hi) / 2.0,
            amplitude: (zoom_hi - zoom_lo) / 2.0,
            period_frames: recipe.ken_burns.cycle_seconds * f64::from(fps),
            energy_boost: effects.zoom_energy_boost,
            ceiling: effects.zoom_ceiling,
        },
    );

    let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];
    let mut input_index = 0usize;
    let mut next_input = || {
        let i = input_index;
        input_index += 1;
        i
    };

    // Background
    let bg_input = next_input();
    match &manifest.background_image {
        Some(image) => args.extend([
            "-loop".into(),
            "1".into(),
            "-framerate".into(),
            fps.to_string(),
            "-i".into(),
            path_arg(&ctx.resolve(image)),
        ]),
        None => args.extend([
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!(
                "color=c={}:s={}x{}:r={}",
                comp.background_color, width, height, fps
            ),
        ]),
    }

    // Character overlays
    let characters_dir = ctx.characters_dir();
    let mut overlays: Vec<(usize, f64, f64, Expr)> = Vec::new();
    if let Some(assignment) = manifest.characters() {
        for (slot, name) in comp.overlay_characters.iter().enumerate() {
            let Some(pose) = assignment.poses.get(name) else {
                continue;
            };
            let input = next_input();
            args.extend([
                "-loop".into(),
                "1".into(),
                "-framerate".into(),
                fps.to_string(),
                "-i".into(),
                path_arg(&characters_dir.join(&pose.pose)),
            ]);
            let x_pct = comp.overlay_x_pct.get(slot).copied().unwrap_or(0.5);
            let bounce = synth.bounce(
                &energy_n,
                analysis.bpm,
                effects.bounce_min_px,
                effects.bounce_max_px,
                slot as f64 * FRAC_PI_4,
                Var::Frame,
            );
            overlays.push((input, x_pct, pose.scale, bounce));
        }
    }

    // End card
    let endcard_input = recipe.endcard.template.as_ref().map(|template| {
        let input = next_input();
        args.extend([
            "-loop".into(),
            "1".into(),
            "-framerate".into(),
            fps.to_string(),
            "-i".into(),
            path_arg(&ctx.resolve(template)),
        ]);
        input
    });

    // Audio
    let audio_input = next_input();
    let song_dir = ctx.store().song_dir(&manifest.key());
    args.extend(["-i".into(), path_arg(&manifest.resolve_audio(&song_dir))]);

    // Filter graph
    let mut chains: Vec<String> = Vec::new();
    chains.push(format!(
        "[{bg}:v]scale={sw}:{sh},zoompan=z='{zoom}':x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':d=1:s={w}x{h}:fps={fps},eq=brightness='{bloom}':eval=frame,format=yuv420p[base]",
        bg = bg_input,
        sw = width * 2,
        sh = height * 2,
        zoom = zoom,
        w = width,
        h = height,
        fps = fps,
        bloom = bloom,
    ));

    let char_height = (f64::from(height) * comp.character_max_height_pct).floor();
    let baseline = f64::from(height) * (1.0 - comp.character_bottom_margin_pct);
    let mut current = "base".to_string();
    for (i, (input, x_pct, scale, bounce)) in overlays.iter().enumerate() {
        let scaled_height = (char_height * scale).floor().max(1.0);
        chains.push(format!(
            "[{}:v]scale=-1:{},format=rgba[char{}]",
            input, scaled_height, i
        ));
        let next = format!("ov{}", i);
        chains.push(format!(
            "[{cur}][char{i}]overlay=x='{x}-w/2':y='{y}-h-({bounce})':eval=frame[{next}]",
            cur = current,
            i = i,
            x = (f64::from(width) * x_pct).floor(),
            y = baseline.floor(),
            bounce = bounce,
            next = next,
        ));
        current = next;
    }

    if let Some(input) = endcard_input {
        chains.push(format!(
            "[{}:v]scale={}:{}:force_original_aspect_ratio=decrease[endcard]",
            input, width, height
        ));
        chains.push(format!(
            "[{}][endcard]overlay=x='(W-w)/2':y='(H-h)/2':enable='gte(t,{})'[withend]",
            current,
            secs(total - timing.endcard_duration_seconds)
        ));
        current = "withend".to_string();
    }

    let font = comp
        .font_file
        .as_ref()
        .map(|f| format!("fontfile='{}':", escape_drawtext(&path_arg(&ctx.resolve(f)))))
        .unwrap_or_default();
    let title_until = secs(intro + 4.0);
    chains.push(format!(
        "[{cur}]drawtext={font}text='{title}':fontcolor=white:fontsize={tsize}:x=(w-text_w)/2:y=h*0.08:enable='lt(t,{until})',drawtext={font}text='{artist}':fontcolor=white:fontsize={ssize}:x=(w-text_w)/2:y=h*0.08+{tsize}*1.3:enable='lt(t,{until})',fade=t=in:st=0:d={fin},fade=t=out:st={fout_st}:d={fout}[vout]",
        cur = current,
        font = font,
        title = escape_drawtext(&manifest.title),
        artist = escape_drawtext(&manifest.artist),
        tsize = comp.title_font_size,
        ssize = comp.subtitle_font_size,
        until = title_until,
        fin = secs(timing.fade_in_seconds),
        fout_st = secs(total - timing.fade_out_seconds),
        fout = secs(timing.fade_out_seconds),
    ));

    let delay_ms = (intro * 1000.0).round() as u64;
    chains.push(format!(
        "[{a}:a]adelay=delays={ms}:all=1,afade=t=out:st={st}:d={d},apad[aout]",
        a = audio_input,
        ms = delay_ms,
        st = secs(total - timing.fade_out_seconds),
        d = secs(timing.fade_out_seconds),
    ));

    let filter_graph = chains.join(";");
    debug!(
        "Filter graph for {}: {} chains, {} bytes",
        manifest.key(),
        chains.len(),
        filter_graph.len()
    );

    args.extend(["-filter_complex".into(), filter_graph.clone()]);
    args.extend([
        "-map".into(),
        "[vout]".into(),
        "-map".into(),
        "[aout]".into(),
        "-c:v".into(),
        video.codec.clone(),
        "-preset".into(),
        video.preset.clone(),
        "-crf".into(),
        video.crf.to_string(),
        "-pix_fmt".into(),
        video.pixel_format.clone(),
        "-r".into(),
        fps.to_string(),
        "-c:a".into(),
        recipe.audio.codec.clone(),
        "-b:a".into(),
        recipe.audio.bitrate.clone(),
        "-ar".into(),
        recipe.audio.sample_rate.to_string(),
        "-t".into(),
        secs(total),
        "-movflags".into(),
        "+faststart".into(),
        "-f".into(),
        "mp4".into(),
        path_arg(output),
    ]);

    Ok(RenderJob {
        args,
        output: output.to_path_buf(),
        duration_seconds: total,
        filter_graph,
    })
}
