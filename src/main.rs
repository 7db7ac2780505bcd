use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use human_repr::HumanCount;
use kdam::{term, tqdm, Bar, BarExt};
use rustop::opts;
use signal_hook::consts::SIGINT;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use mediamorph::config::{self, Settings};
use mediamorph::converter::{
    ConversionOptions, Converter, ConverterMessage, FileOutcome, RunOutcome,
};
use mediamorph::ffmpeg::FFmpeg;
use mediamorph::fstools::{classify_file, file_size, DirEntryCategory};
use mediamorph::profile::ProfileStore;
use mediamorph::queue::AddEvent;
use mediamorph::scanner::FileScanner;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    let (args, _rest) = opts! {
        synopsis "Convert video and audio files with ffmpeg using named profiles.";
        opt profile:Option<String>, desc:"Conversion profile (e.g. MP4, WEBM, DVD).";
        opt preset:Option<String>, desc:"Quality preset of the profile.";
        opt output_dir:Option<String>, desc:"Directory for converted files.";
        opt tag:bool=false, desc:"Append the profile name to output file names.";
        opt subtitles:bool=false, desc:"Burn a sibling .srt/.ssa/.stl file into the video.";
        opt delete_input:bool=false, desc:"Delete each source file after a successful conversion.";
        opt config:Option<String>, desc:"Settings file.";
        opt list_profiles:bool=false, desc:"List profiles and presets, then exit.";
        opt export_profiles:Option<String>, desc:"Export the profile definitions into a directory.";
        opt import_profiles:Option<String>, desc:"Import profile definitions from a file.";
        opt restore_profiles:bool=false, desc:"Restore the bundled profile definitions.";
        opt verbose:bool=false, short:'v', desc:"Debug logging.";
        param files:Vec<String>, desc:"Files or directories to convert.";
    }
    .parse_or_exit();

    init_logging(args.verbose);

    let settings = match config::load_settings_or_default(args.config.as_deref().map(Path::new)) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        },
    };

    let mut profiles = match ProfileStore::open(&settings.profiles_file, &settings.locale) {
        Ok(profiles) => profiles,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        },
    };

    let managing = args.restore_profiles
        || args.import_profiles.is_some()
        || args.export_profiles.is_some()
        || args.list_profiles;
    let managed = manage_profiles(
        &mut profiles,
        &args.import_profiles,
        &args.export_profiles,
        args.restore_profiles,
    );
    if let Err(err) = managed {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }
    if args.list_profiles {
        list_profiles(&profiles);
    }
    if args.files.is_empty() {
        return match managing {
            true => ExitCode::SUCCESS,
            false => {
                eprintln!("Nothing to convert. See --help.");
                ExitCode::FAILURE
            },
        };
    }

    let ffmpeg = match FFmpeg::locate(settings.encoder.as_deref(), settings.prober.as_deref()) {
        Ok(ffmpeg) if ffmpeg.is_installed() => ffmpeg,
        Ok(ffmpeg) => {
            eprintln!("{} does not run.", ffmpeg.encoder.display());
            return ExitCode::FAILURE;
        },
        Err(err) => {
            eprintln!("{}. Please install ffmpeg.", err);
            return ExitCode::FAILURE;
        },
    };

    let options = ConversionOptions {
        profile: args.profile.clone().unwrap_or(settings.conversion.profile.clone()),
        output_dir: args
            .output_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or(settings.conversion.output_dir.clone()),
        tag_output: args.tag || settings.conversion.tag_output,
        embed_subtitles: args.subtitles || settings.conversion.embed_subtitles,
        delete_input_on_success: args.delete_input || settings.conversion.delete_input_on_success,
        ..settings.conversion.clone()
    };

    let built = build_converter(&settings, profiles, &ffmpeg, options, args.preset.as_deref());
    let mut converter = match built {
        Ok(converter) => converter,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        },
    };
    let rx = converter.subscribe();

    let adding = converter.add_files(expand_paths(&args.files));
    let total = adding.total();
    for event in adding {
        match event {
            AddEvent::Added(path) => debug!("added {}", path.display()),
            AddEvent::Rejected(path, err) => println!("Skipping {}: {}", path.display(), err),
        }
    }
    if converter.queue().is_empty() {
        eprintln!("None of the {} file(s) can be converted.", total);
        return ExitCode::FAILURE;
    }

    let stop = Arc::new(AtomicBool::new(false));
    for registered in [
        signal_hook::flag::register_conditional_shutdown(SIGINT, 1, Arc::clone(&stop)),
        signal_hook::flag::register(SIGINT, Arc::clone(&stop)),
    ] {
        if let Err(err) = registered {
            warn!("unable to handle Ctrl-C: {}", err);
        }
    }

    if let Err(err) = converter.start_conversion() {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }

    term::init(false);
    let mut bars = ProgressBars::new();
    let mut outcome = None;
    let mut stopping = false;
    loop {
        if !stopping && stop.load(Ordering::Relaxed) {
            println!("Stopping...");
            stopping = true;
            converter.stop_all();
        }
        let running = converter.poll(POLL_INTERVAL);
        for msg in rx.try_iter() {
            if let ConverterMessage::RunFinished(o) = &msg {
                outcome = Some(o.clone());
            }
            bars.handle(&msg, &converter);
        }
        if !running {
            break;
        }
    }

    match outcome {
        Some(RunOutcome::Completed { .. }) => {
            println!("Done! ^__^");
            ExitCode::SUCCESS
        },
        Some(RunOutcome::StoppedByUser) => {
            println!("Stopped.");
            ExitCode::from(130)
        },
        Some(RunOutcome::Failed(err)) => {
            println!("Failure -__-\n{}", err);
            ExitCode::FAILURE
        },
        None => ExitCode::SUCCESS,
    }
}

fn init_logging(verbose: bool) {
    let filter = match verbose {
        true => EnvFilter::new("mediamorph=debug"),
        false => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mediamorph=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn manage_profiles(
    profiles: &mut ProfileStore,
    import: &Option<String>,
    export: &Option<String>,
    restore: bool,
) -> Result<(), mediamorph::error::ProfileError> {
    if restore {
        profiles.restore_defaults()?;
        println!("Restored the default profiles.");
    }
    if let Some(file) = import {
        profiles.import(Path::new(file))?;
        println!("Imported profiles from {}.", file);
    }
    if let Some(dir) = export {
        let path = profiles.export(Path::new(dir))?;
        println!("Exported profiles to {}.", path.display());
    }
    Ok(())
}

fn list_profiles(profiles: &ProfileStore) {
    for profile in profiles.profiles() {
        println!("{} (.{})", profile.name, profile.extension());
        for preset in &profile.presets {
            println!("    {:<32} {}", preset.name, preset.params);
        }
    }
}

fn build_converter(
    settings: &Settings,
    profiles: ProfileStore,
    ffmpeg: &FFmpeg,
    options: ConversionOptions,
    preset: Option<&str>,
) -> Result<Converter, mediamorph::error::ConversionError> {
    let prober = Box::new(ffmpeg.prober());
    let mut converter = Converter::new(profiles, ffmpeg.encoder.clone(), prober, options)?
        .stop_grace(settings.stop_grace());
    if let Some(preset) = preset {
        converter.change_preset(None, preset)?;
    }
    Ok(converter)
}

/// Files as given; directories replaced by the media files they contain.
fn expand_paths(inputs: &[String]) -> Vec<PathBuf> {
    let scanner = FileScanner::new(true);
    let mut paths = vec![];
    for input in inputs {
        let path = PathBuf::from(input);
        match classify_file(&path) {
            DirEntryCategory::Directory => paths.extend(scanner.scan(&path)),
            DirEntryCategory::RegularFile => paths.push(path),
            DirEntryCategory::DoesNotExist => println!("{} does not exist.", input),
            DirEntryCategory::SymbolicLink => println!("{} is a broken symlink.", input),
            DirEntryCategory::Unknown => println!("Unable to classify {}.", input),
        }
    }
    paths
}

struct ProgressBars {
    file: Bar,
    total: Bar,
}

impl ProgressBars {
    fn new() -> Self {
        ProgressBars {
            file: tqdm!(total = 100, desc = "file", position = 0, force_refresh = true),
            total: tqdm!(total = 100, desc = "total", position = 1, force_refresh = true),
        }
    }

    fn handle(&mut self, msg: &ConverterMessage, converter: &Converter) {
        match msg {
            ConverterMessage::FileStarted { index, name } => {
                let size = converter.queue().get(*index).map(|t| file_size(&t.path)).unwrap_or(0);
                self.file.reset(Some(100));
                self.file.set_description(format!("{} ({})", name, size.human_count_bytes()));
                let _ = self.file.refresh();
            },
            ConverterMessage::Progress(update) => {
                self.file.set_postfix(format!("{} left, {}", update.remaining, update.bitrate));
                let _ = self.file.update_to(update.operation as usize);
                self.total.set_postfix(format!("elapsed {}", update.elapsed));
                let _ = self.total.update_to(update.process as usize);
            },
            ConverterMessage::FileFinished { name, outcome, .. } => match outcome {
                FileOutcome::Done => (),
                FileOutcome::Stopped => println!("\nStopped {}.", name),
                FileOutcome::Error(err) => println!("\n{} failed: {}", name, err),
            },
            ConverterMessage::Warning(warning) => println!("\n{}", warning),
            ConverterMessage::RunFinished(_) => println!(),
        }
    }
}
