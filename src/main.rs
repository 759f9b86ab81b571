extern crate log;
use anyhow::anyhow;
use clap::Parser;
use gis_interchange::convert::orchestrator::{
    ExportOptions, Format, Materialize, Orchestrator, PrjSource,
};
use gis_interchange::crs::projection::ProjectionDefinition;
use gis_interchange::crs::reproject::reproject_point;
use gis_interchange::geofile::DecodeOptions;
use serde::Deserialize;
use std::path::PathBuf;
use std::{fs::read_to_string, path::Path};

/// Convert GIS layers between GeoJSON, Esri JSON and Shapefile.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input config file.
    #[arg(short, long)]
    config_filepath: String,
}

#[derive(Deserialize, Debug)]
enum Task {
    Convert {
        input: PathBuf,
        output: PathBuf,
        #[serde(default)]
        input_format: Option<Format>,
        #[serde(default)]
        format: Option<Format>,
        #[serde(default = "default_true")]
        write: bool,
        #[serde(default)]
        source_prj: Option<String>,
        #[serde(default)]
        target_prj: Option<String>,
        #[serde(default)]
        pretty: bool,
        #[serde(default)]
        wkid: Option<i32>,
        /// Text stored for blank input values; null when unset.
        #[serde(default)]
        blank_sentinel: Option<String>,
    },
    ReprojectPoint {
        x: f64,
        y: f64,
        source_prj: String,
        target_prj: String,
    },
    PrjInfo {
        prj: PathBuf,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Debug)]
struct Config {
    tasks: Vec<Task>,
}

fn prj_source(text: &Option<String>) -> Option<PrjSource> {
    text.as_deref().and_then(|text| text.parse().ok())
}

fn run_task(task: &Task) -> anyhow::Result<()> {
    match task {
        Task::Convert {
            input,
            output,
            input_format,
            format,
            write,
            source_prj,
            target_prj,
            pretty,
            wkid,
            blank_sentinel,
        } => {
            let format = format
                .or_else(|| Format::from_path(output))
                .ok_or_else(|| anyhow!("Cannot tell the output format of {:?}", output))?;
            let options = ExportOptions {
                source_prj: prj_source(source_prj),
                target_prj: prj_source(target_prj),
                pretty: *pretty,
                wkid: *wkid,
                ..ExportOptions::new(format)
            };
            let materialize = Materialize {
                path: Some(output.clone()),
                write: *write,
            };
            let decode_options = DecodeOptions {
                blank_sentinel: blank_sentinel.clone(),
            };
            let outcome = Orchestrator::new().convert(
                input,
                *input_format,
                &decode_options,
                &options,
                &materialize,
            )?;
            if !outcome.warnings.is_empty() {
                log::info!("{} warnings", outcome.warnings.len());
            }
            println!("{}", outcome.message);
        }
        Task::ReprojectPoint {
            x,
            y,
            source_prj,
            target_prj,
        } => {
            let source = source_prj.parse::<PrjSource>()?.load()?;
            let target = target_prj.parse::<PrjSource>()?.load()?;
            let (rx, ry) = reproject_point(*x, *y, &source, &target)?;
            log::info!(
                "Reprojected ({}, {}) from '{}' to '{}'",
                x,
                y,
                source.name(),
                target.name()
            );
            println!("{} {}", rx, ry);
        }
        Task::PrjInfo { prj } => {
            let projection = ProjectionDefinition::from_file(prj)?;
            println!("name: {}", projection.name());
            println!("kind: {:?}", projection.kind());
            println!("datum: {}", projection.datum_name().unwrap_or("unknown"));
            if let Some(method) = projection.projection_name() {
                println!("projection: {}", method);
            }
            match projection.epsg_code() {
                Some(code) => println!("epsg: {}", code),
                None => println!("epsg: unknown"),
            }
            match projection.wkid() {
                Some(wkid) => println!("wkid: {}", wkid),
                None => println!("wkid: unknown"),
            }
            println!("{}", projection.wkt());
        }
    }
    Ok(())
}

fn try_main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    env_logger::init();

    let args = Args::try_parse()?;
    if !Path::new(&args.config_filepath).exists() {
        return Err(anyhow!("Config file {} not found", &args.config_filepath));
    }
    let config_contents = read_to_string(args.config_filepath)?;
    let config: Config = serde_yaml::from_str(&config_contents)?;

    log::info!("Running {} tasks", config.tasks.len());
    for task in &config.tasks {
        log::debug!("{:?}", task);
        run_task(task)?;
    }
    Ok(())
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1)
    }
}
