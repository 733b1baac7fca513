use std::{collections::HashMap, path::PathBuf, sync::Arc};

use cgmath::{Deg, Point2};
use clap::Parser;
use geozero::mvt::tile::GeomType;
use maplibre_lines::{
    coords::{WorldTileCoords, Zoom, ZoomLevel, TILE_SIZE},
    io::{channel, ChannelError, ResourceRequest, ResourceResponse},
    render::{
        atlas::{ImagePosition, LineAtlas},
        pass::CommandRecorder,
        LineFrame, LineRenderer, RenderPhase, Transform,
    },
    settings::Settings,
    style::StyleLayerSet,
    vector::{
        decoder::PropertyValue,
        encoder::{GeometryEncoder, LayerBuilder},
        BucketBuilder, JobOutcome, LayerFamilyGrouper, TileStore, TileWorker,
    },
};
use tokio::runtime::Runtime;

const DEFAULT_STYLE: &str = r##"{
    "layers": [
        {
            "id": "water",
            "type": "fill",
            "source-layer": "water",
            "paint": { "fill-color": "#a0c8f0" }
        },
        {
            "id": "road-casing",
            "type": "line",
            "source-layer": "roads",
            "layout": { "line-cap": "round", "line-join": "round" },
            "paint": { "line-color": "#888888", "line-width": 6 }
        },
        {
            "id": "road",
            "type": "line",
            "source-layer": "roads",
            "layout": { "line-cap": "round", "line-join": "round" },
            "paint": {
                "line-color": ["match", ["get", "class"], "primary", "#ffcc00", "#ffffff"],
                "line-width": 4
            }
        },
        {
            "id": "path",
            "type": "line",
            "source-layer": "roads",
            "paint": { "line-color": "#666666", "line-dasharray": [2, 1] }
        },
        {
            "id": "rail",
            "type": "line",
            "source-layer": "rail",
            "paint": { "line-pattern": "sleepers", "line-width": 3 }
        }
    ]
}"##;

/// Builds the buckets of one vector tile and prints the line draw calls of one frame.
#[derive(Parser)]
#[command(name = "maplibre-lines-demo")]
struct Cli {
    /// Vector tile to read, a small generated tile is used if absent
    #[arg(long)]
    tile: Option<PathBuf>,
    /// Style document with a `layers` array
    #[arg(long)]
    style: Option<PathBuf>,
    /// JSON file with pipeline and renderer settings
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    x: i32,
    #[arg(long, default_value_t = 0)]
    y: i32,
    #[arg(long, default_value_t = 0)]
    z: u8,
    /// Camera zoom, defaults to the zoom of the tile
    #[arg(long)]
    zoom: Option<f64>,
    /// Camera pitch in degrees
    #[arg(long, default_value_t = 0.0)]
    pitch: f64,
    /// Camera bearing in degrees
    #[arg(long, default_value_t = 0.0)]
    bearing: f64,
    /// Overrides the device pixel ratio of the settings
    #[arg(long)]
    pixel_ratio: Option<f32>,
}

fn generated_tile() -> Vec<u8> {
    let class = |name: &str| [("class", PropertyValue::String(name.to_string()))];

    let mut roads = LayerBuilder::new("roads");
    roads
        .add_feature(
            GeomType::Linestring,
            GeometryEncoder::line_string(&[(0, 2048), (1024, 1800), (2048, 2048), (4096, 2100)]),
            &class("primary"),
        )
        .add_feature(
            GeomType::Linestring,
            GeometryEncoder::line_string(&[(2048, 0), (2100, 1500), (1900, 4096)]),
            &class("residential"),
        );

    let mut rail = LayerBuilder::new("rail");
    rail.add_feature(
        GeomType::Linestring,
        GeometryEncoder::line_string(&[(0, 3500), (4096, 3300)]),
        &[],
    );

    let mut water = LayerBuilder::new("water");
    water.add_feature(
        GeomType::Polygon,
        GeometryEncoder::new()
            .move_to(300, 300)
            .line_to(&[(1200, 300), (1200, 1200), (300, 1200)])
            .close_path()
            .encode(),
        &[],
    );

    LayerBuilder::encode_tile(vec![roads, rail, water])
}

/// Places every requested image in a grid of 32 pixel cells of a 512 pixel sprite.
fn sprite_positions(icons: &[String]) -> HashMap<String, ImagePosition> {
    const CELL: f32 = 32.0 / 512.0;
    icons
        .iter()
        .enumerate()
        .map(|(i, icon)| {
            let (col, row) = ((i % 16) as f32, (i / 16) as f32);
            (
                icon.clone(),
                ImagePosition {
                    tl: [col * CELL, row * CELL],
                    br: [(col + 1.0) * CELL, (row + 1.0) * CELL],
                    size: [32.0, 32.0],
                },
            )
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let cli = Cli::parse();

    let mut settings: Settings = match &cli.settings {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => Settings::default(),
    };
    if let Some(pixel_ratio) = cli.pixel_ratio {
        settings.renderer.device_pixel_ratio = pixel_ratio;
    }

    let style = match &cli.style {
        Some(path) => StyleLayerSet::from_json(&std::fs::read_to_string(path)?)?,
        None => StyleLayerSet::from_json(DEFAULT_STYLE)?,
    };
    let payload = match &cli.tile {
        Some(path) => std::fs::read(path)?,
        None => generated_tile(),
    };
    let coords = WorldTileCoords::from((cli.x, cli.y, ZoomLevel::from(cli.z)));

    let runtime = Runtime::new()?;
    let (channel, endpoint) = channel();
    runtime.spawn(endpoint.serve(|request| match request {
        ResourceRequest::Icons { icons } => Ok(ResourceResponse::Icons(sprite_positions(icons))),
        other => Err(ChannelError::Remote(format!("{} is not served", other.action()))),
    }));

    let families = LayerFamilyGrouper::global().group(&style);
    let builder = BucketBuilder::new(Arc::new(channel), settings.pipeline.clone());
    let mut worker = TileWorker::new(builder, runtime.handle().clone());
    let mut store = TileStore::new();

    worker.schedule_build(&mut store, coords, payload, families.clone());
    let Some(result) = runtime.block_on(worker.next_result()) else {
        return Err("worker stopped before the tile was built".into());
    };
    match store.complete(result.ticket, result.result) {
        JobOutcome::Applied => {}
        JobOutcome::Discarded => return Err("build result was discarded".into()),
        JobOutcome::Failed(e) => return Err(e.into()),
    }
    let Some(buckets) = store.buckets(&coords) else {
        return Err("tile has no buckets".into());
    };

    println!("tile {coords}: {} families", families.len());
    for bucket in &buckets.buckets {
        println!(
            "  {:<12} layers {:?}: {} groups, {} vertices",
            bucket.source_layer,
            bucket.layer_ids,
            bucket.group_count(),
            bucket.vertex_count()
        );
        for (id, options) in bucket.layer_ids.iter().zip(&bucket.program_options) {
            log::debug!("    {id}: {}", options.cache_key());
        }
    }

    let mut transform = Transform::new(1024.0, 768.0);
    transform.zoom = Zoom::new(cli.zoom.unwrap_or(cli.z as f64));
    let scale = TILE_SIZE * Zoom::from(coords.z).scale_delta(&transform.zoom);
    transform.center = Point2::new(
        (coords.x as f64 + 0.5) * scale,
        (coords.y as f64 + 0.5) * scale,
    );
    transform.set_pitch(Deg(cli.pitch));
    transform.set_bearing(Deg(cli.bearing));

    let sprites = buckets
        .buckets
        .iter()
        .flat_map(|bucket| bucket.pattern_positions.clone())
        .collect::<HashMap<_, _>>();
    let mut renderer = LineRenderer::new(settings.renderer.clone(), LineAtlas::default(), sprites);
    let frame = LineFrame {
        phase: RenderPhase::Translucent,
        transform: &transform,
        visible: &[coords],
    };

    let mut recorder = CommandRecorder::new();
    for layer in style.iter() {
        if layer.line_paint().is_some() {
            let draws = renderer.draw_style_layer(&mut recorder, &frame, layer, &store);
            println!("layer {:<12} {draws} draw calls", layer.id);
        }
    }
    for command in &recorder.commands {
        println!("  {command:?}");
    }

    Ok(())
}
