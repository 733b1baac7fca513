use criterion::{black_box, criterion_group, criterion_main, Criterion};
use geozero::mvt::tile::GeomType;
use maplibre_lines::vector::{
    decode_tile,
    decoder::PropertyValue,
    encoder::{GeometryEncoder, LayerBuilder},
};

/// A tile with a few hundred zig-zag roads and square buildings.
fn synthetic_tile() -> Vec<u8> {
    let mut roads = LayerBuilder::new("transportation");
    for i in 0..256 {
        let y = (i * 16) % 4096;
        let points: Vec<(i32, i32)> = (0..64).map(|x| (x * 64, y + (x % 2) * 8)).collect();
        roads.add_feature(
            GeomType::Linestring,
            GeometryEncoder::line_string(&points),
            &[("class", PropertyValue::String("minor".to_string()))],
        );
    }

    let mut buildings = LayerBuilder::new("building");
    for i in 0..512 {
        let (x, y) = ((i % 32) * 128, (i / 32) * 128);
        buildings.add_feature(
            GeomType::Polygon,
            GeometryEncoder::new()
                .move_to(x, y)
                .line_to(&[(x + 100, y), (x + 100, y + 100), (x, y + 100)])
                .close_path()
                .encode(),
            &[("height", PropertyValue::Double(12.0))],
        );
    }

    LayerBuilder::encode_tile(vec![roads, buildings])
}

fn bench_decode_tile(c: &mut Criterion) {
    let data = synthetic_tile();

    c.bench_function("decode_tile", |b| {
        b.iter(|| decode_tile(black_box(&data)).expect("tile decodes"))
    });
}

criterion_group!(benches, bench_decode_tile);
criterion_main!(benches);
