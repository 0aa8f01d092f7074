mod config;
mod demo;
mod logger;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dtex::DeepReader;
use image::{GrayImage, RgbImage};
use model::Color;
use serde::Serialize;
use tiles::DeepShadowMap;

use crate::config::UmbraConfig;

#[derive(Parser)]
#[command(author, version, about = "Inspect and produce deep shadow maps")]
struct Arguments {
    /// TOML file with `[cache]` and `[output]` settings.
    #[arg(long, global = true, value_parser)]
    config: Option<PathBuf>,
    /// Log more; repeat for debug and trace output.
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the header of a deep texture file.
    Info {
        file: PathBuf,
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
        /// Include every tile table entry.
        #[arg(long)]
        table: bool,
    },
    /// Visibility of one pixel at a depth.
    Lookup {
        file: PathBuf,
        x: u32,
        y: u32,
        depth: f32,
    },
    /// Write PNG slices of the map at evenly spaced depths.
    Slices {
        file: PathBuf,
        #[arg(long, default_value_t = 20)]
        count: u32,
        #[arg(long, short = 'o', value_parser, default_value = "slices")]
        out: PathBuf,
    },
    /// Render a synthetic scene into a new file.
    Demo {
        file: PathBuf,
        #[arg(long, default_value_t = 256)]
        width: u32,
        #[arg(long, default_value_t = 256)]
        height: u32,
        #[arg(long, default_value_t = 3)]
        channels: u32,
        #[arg(long, default_value_t = 4)]
        producers: usize,
    },
}

fn main() -> Result<()> {
    let arguments = Arguments::parse();
    logger::init(arguments.verbose);
    let config = match &arguments.config {
        Some(path) => UmbraConfig::load(path)?,
        None => UmbraConfig::default(),
    };

    match arguments.command {
        Command::Info { file, json, table } => info(&file, json, table),
        Command::Lookup { file, x, y, depth } => lookup(&config, &file, x, y, depth),
        Command::Slices { file, count, out } => slices(&config, &file, count, &out),
        Command::Demo {
            file,
            width,
            height,
            channels,
            producers,
        } => {
            let output = config.output_config(width, height, channels);
            let report = demo::render(&file, output, producers)?;
            println!(
                "{}: {} regions, {} tiles written, {} elided, {} bytes",
                file.display(),
                report.regions,
                report.summary.tiles_written,
                report.summary.tiles_elided,
                report.summary.file_size
            );
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
struct InfoReport {
    file: String,
    file_size: u32,
    image_width: u32,
    image_height: u32,
    channels: u32,
    tile_width: u32,
    tile_height: u32,
    tile_count: u32,
    data_size: u32,
    elided_tiles: usize,
    world_to_screen: Vec<f32>,
    world_to_camera: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<Vec<TableRow>>,
}

#[derive(Debug, Serialize)]
struct TableRow {
    tile_row: u32,
    tile_col: u32,
    file_offset: u32,
}

fn info(file: &Path, json: bool, with_table: bool) -> Result<()> {
    let reader = DeepReader::open(file).with_context(|| format!("open {}", file.display()))?;
    let header = reader.header();
    let report = InfoReport {
        file: file.display().to_string(),
        file_size: header.file_size,
        image_width: header.image_width,
        image_height: header.image_height,
        channels: header.channels,
        tile_width: header.tile_width,
        tile_height: header.tile_height,
        tile_count: header.tile_count,
        data_size: header.data_size,
        elided_tiles: reader.table().elided_count(),
        world_to_screen: header.transforms.world_to_screen.to_vec(),
        world_to_camera: header.transforms.world_to_camera.to_vec(),
        table: with_table.then(|| {
            reader
                .table()
                .entries()
                .map(|entry| TableRow {
                    tile_row: entry.tile_row,
                    tile_col: entry.tile_col,
                    file_offset: entry.file_offset,
                })
                .collect()
        }),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize json")?
        );
        return Ok(());
    }
    println!("{}", report.file);
    println!(
        "  image {}x{}, {} channel(s), {} bytes",
        report.image_width, report.image_height, report.channels, report.file_size
    );
    println!(
        "  tiles {}x{}, {} total, {} elided, {} data bytes",
        report.tile_width,
        report.tile_height,
        report.tile_count,
        report.elided_tiles,
        report.data_size
    );
    for row in report.table.iter().flatten() {
        println!(
            "  tile row {} col {} -> {}",
            row.tile_row, row.tile_col, row.file_offset
        );
    }
    Ok(())
}

fn open_map(config: &UmbraConfig, file: &Path) -> Result<DeepShadowMap> {
    let map =
        DeepShadowMap::open(file, config.cache_config()).context("tile cache settings")?;
    if !map.is_valid() {
        return Err(anyhow::anyhow!(
            "{} is not a readable deep shadow map",
            file.display()
        ));
    }
    Ok(map)
}

fn lookup(config: &UmbraConfig, file: &Path, x: u32, y: u32, depth: f32) -> Result<()> {
    let map = open_map(config, file)?;
    if x >= map.width() || y >= map.height() {
        return Err(anyhow::anyhow!(
            "pixel ({x}, {y}) is outside the {}x{} map",
            map.width(),
            map.height()
        ));
    }
    let Color([r, g, b]) = map.visibility_at(x, y, depth);
    if map.channels() == 1 {
        println!("{r}");
    } else {
        println!("{r} {g} {b}");
    }
    Ok(())
}

fn slices(config: &UmbraConfig, file: &Path, count: u32, out: &Path) -> Result<()> {
    if count == 0 {
        return Err(anyhow::anyhow!("slice count must be at least 1"));
    }
    let map = open_map(config, file)?;
    fs::create_dir_all(out)
        .with_context(|| format!("create output directory {}", out.display()))?;

    let greatest = map.greatest_depth();
    for index in 0..count {
        let depth = if count == 1 {
            greatest
        } else {
            greatest * index as f32 / (count - 1) as f32
        };
        let pixels = map.depth_slice(depth);
        let path = out.join(format!("slice_{index:03}.png"));
        save_slice(&path, map.width(), map.height(), map.channels(), &pixels)?;
        log::info!("depth {depth} -> {}", path.display());
    }
    if let Some(stats) = map.cache_stats() {
        log::info!(
            "cache: {} hits, {} misses, {} decodes, {} evictions",
            stats.hits,
            stats.misses,
            stats.decodes,
            stats.evictions
        );
    }
    println!("wrote {count} slices to {}", out.display());
    Ok(())
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn save_slice(path: &Path, width: u32, height: u32, channels: u32, pixels: &[Color]) -> Result<()> {
    let saved = if channels == 1 {
        let bytes = pixels.iter().map(|color| to_byte(color.0[0])).collect();
        GrayImage::from_raw(width, height, bytes)
            .ok_or_else(|| anyhow::anyhow!("slice buffer does not match {width}x{height}"))?
            .save(path)
    } else {
        let bytes = pixels
            .iter()
            .flat_map(|color| color.0.map(to_byte))
            .collect();
        RgbImage::from_raw(width, height, bytes)
            .ok_or_else(|| anyhow::anyhow!("slice buffer does not match {width}x{height}"))?
            .save(path)
    };
    saved.with_context(|| format!("write {}", path.display()))
}
