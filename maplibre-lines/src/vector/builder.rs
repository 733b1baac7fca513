//! Builds the buckets of a tile and regenerates their paint buffers after style changes.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use cgmath::Point2;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    coords::{WorldTileCoords, EXTENT_UINT},
    error::BuildError,
    io::message::{Action, ChannelError, MessageChannel, ResourceRequest, ResourceResponse},
    render::atlas::ImagePosition,
    settings::PipelineSettings,
    style::{
        layer::{LayerLayout, LayerPaint},
        paint::{premultiplied, PossiblyEvaluated, ResolvedFillPaint, ResolvedLinePaint},
    },
    tessellation::{
        fill::{FillLayoutVertex, FillTessellation},
        line::{LineLayoutVertex, LineTessellator},
        LayoutBuffers, LayoutGroup,
    },
    vector::{
        bucket::{
            Bucket, BucketBuffers, BufferGroup, FillPaintVertex, LinePaintVertex, ProgramOptions,
            TileBuckets,
        },
        decoder::{DecodedLayer, DecodedTile, FeatureProperties, Geometry, PropertyData},
        family::LayerFamily,
    },
};

/// Layout groups of one family, shared between a bucket and the buckets derived from it.
enum FamilyGeometry {
    Line(Vec<Arc<LayoutGroup<LineLayoutVertex>>>),
    Fill(Vec<Arc<LayoutGroup<FillLayoutVertex>>>),
}

impl FamilyGeometry {
    fn of_bucket(bucket: &Bucket) -> Self {
        match &bucket.buffers {
            BucketBuffers::Line(groups) => {
                FamilyGeometry::Line(groups.iter().map(|g| g.layout.clone()).collect())
            }
            BucketBuffers::Fill(groups) => {
                FamilyGeometry::Fill(groups.iter().map(|g| g.layout.clone()).collect())
            }
        }
    }
}

/// A family whose geometry is ready and which waits for its images.
struct PendingFamily<'a> {
    family: &'a LayerFamily,
    geometry: FamilyGeometry,
    images: BTreeSet<String>,
}

/// Tessellates layer families into buckets. Images referenced by line patterns are resolved over
/// the message channel before any bucket is produced.
pub struct BucketBuilder<C> {
    channel: Arc<C>,
    settings: PipelineSettings,
}

impl<C> Clone for BucketBuilder<C> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<C: MessageChannel + 'static> BucketBuilder<C> {
    pub fn new(channel: Arc<C>, settings: PipelineSettings) -> Self {
        Self { channel, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Builds one bucket for every family whose source layer is part of `tile`.
    ///
    /// Either every bucket of the tile is returned or none. The build fails if one of the image
    /// requests fails or if `cancel` fires before all of them completed.
    #[tracing::instrument(skip_all)]
    pub async fn build(
        &self,
        coords: WorldTileCoords,
        tile: &DecodedTile,
        families: &[LayerFamily],
        cancel: &CancellationToken,
    ) -> Result<TileBuckets, BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let property_data = tile.property_data();
        let overscaling =
            2f64.powi(i32::from(u8::from(coords.tile_zoom)) - i32::from(u8::from(coords.z)));

        let mut pending = Vec::new();
        for family in families {
            let Some(layer) = tile.layer(&family.source_layer) else {
                continue;
            };
            let geometry = self.tessellate(family, layer, overscaling)?;
            let images = image_dependencies(family, property_data.layer(&family.source_layer));
            pending.push(PendingFamily {
                family,
                geometry,
                images,
            });
        }

        let buckets = self.finish(pending, &property_data, cancel).await?;
        Ok(TileBuckets {
            coords,
            buckets,
            property_data,
        })
    }

    /// Regenerates the paint buffers of `previous` for the current paint of `families`.
    ///
    /// Layout groups are shared with `previous`, vertex counts and indices never change. A family
    /// whose layout no longer matches any bucket of `previous` fails with
    /// [`BuildError::LayoutChanged`], the tile has to be built again.
    #[tracing::instrument(skip_all)]
    pub async fn update_properties(
        &self,
        previous: &TileBuckets,
        families: &[LayerFamily],
        cancel: &CancellationToken,
    ) -> Result<TileBuckets, BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let property_data = &previous.property_data;

        let mut pending = Vec::new();
        for family in families {
            let geometry = match previous.bucket(&family.source_layer, &family.layout) {
                Some(bucket) => FamilyGeometry::of_bucket(bucket),
                None if property_data.layer(&family.source_layer).is_none() => continue,
                None => return Err(BuildError::LayoutChanged(family.id().to_string())),
            };
            let images = image_dependencies(family, property_data.layer(&family.source_layer));
            pending.push(PendingFamily {
                family,
                geometry,
                images,
            });
        }

        let buckets = self.finish(pending, property_data, cancel).await?;
        Ok(TileBuckets {
            coords: previous.coords,
            buckets,
            property_data: property_data.clone(),
        })
    }

    async fn finish(
        &self,
        pending: Vec<PendingFamily<'_>>,
        property_data: &PropertyData,
        cancel: &CancellationToken,
    ) -> Result<Vec<Bucket>, BuildError> {
        let requests = pending
            .iter()
            .map(|p| (p.family.id().to_string(), p.images.iter().cloned().collect()))
            .collect();
        let positions = self.resolve_images(requests, cancel).await?;

        Ok(pending
            .into_iter()
            .zip(positions)
            .map(|(pending, positions)| {
                paint_bucket(pending.family, pending.geometry, property_data, positions)
            })
            .collect())
    }

    fn tessellate(
        &self,
        family: &LayerFamily,
        layer: &DecodedLayer,
        overscaling: f64,
    ) -> Result<FamilyGeometry, BuildError> {
        let scale = EXTENT_UINT as f64 / layer.extent.max(1) as f64;

        match &family.layout {
            LayerLayout::Line(layout) => {
                let tessellator = LineTessellator::new(layout, overscaling);
                let mut buffers = LayoutBuffers::new(self.settings.vertex_limit());

                for (index, feature) in layer.features.iter().enumerate() {
                    match &feature.geometry {
                        Geometry::LineStrings(lines) => {
                            let lines = rescale(lines, scale);
                            tessellator.add_feature(&mut buffers, index, &lines, false);
                        }
                        Geometry::Polygons(rings) => {
                            let rings = rescale(rings, scale);
                            tessellator.add_feature(&mut buffers, index, &rings, true);
                        }
                        Geometry::Points(_) | Geometry::Unknown => {}
                    }
                }

                Ok(FamilyGeometry::Line(
                    buffers.finish().into_iter().map(Arc::new).collect(),
                ))
            }
            LayerLayout::Fill => {
                let mut tessellation = FillTessellation::new(self.settings.fill_tolerance);
                let mut buffers = LayoutBuffers::new(self.settings.vertex_limit());

                for (index, feature) in layer.features.iter().enumerate() {
                    if let Geometry::Polygons(rings) = &feature.geometry {
                        tessellation.add_feature(&mut buffers, index, &rescale(rings, scale))?;
                    }
                }

                Ok(FamilyGeometry::Fill(
                    buffers.finish().into_iter().map(Arc::new).collect(),
                ))
            }
        }
    }

    /// Sends one `get-icons` request per family with images and waits for all of them.
    async fn resolve_images(
        &self,
        requests: Vec<(String, Vec<String>)>,
        cancel: &CancellationToken,
    ) -> Result<Vec<HashMap<String, ImagePosition>>, BuildError> {
        let mut resolved = vec![HashMap::new(); requests.len()];
        let mut tasks = JoinSet::new();

        for (index, (family, icons)) in requests.into_iter().enumerate() {
            if icons.is_empty() {
                continue;
            }
            let channel = self.channel.clone();
            tasks.spawn(async move {
                let response = channel
                    .send(ResourceRequest::Icons {
                        icons: icons.clone(),
                    })
                    .await;
                (index, family, icons, response)
            });
        }

        // Dropping the join set on an early return aborts the remaining requests.
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BuildError::Cancelled),
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            let (index, family, icons, response) = joined.map_err(|e| BuildError::Channel {
                action: Action::GetIcons.name(),
                source: ChannelError::Remote(e.to_string()),
            })?;
            let positions = match response {
                Ok(ResourceResponse::Icons(positions)) => positions,
                Ok(_) => {
                    return Err(BuildError::Channel {
                        action: Action::GetIcons.name(),
                        source: ChannelError::UnexpectedResponse(Action::GetIcons),
                    })
                }
                Err(source) => {
                    return Err(BuildError::Channel {
                        action: Action::GetIcons.name(),
                        source,
                    })
                }
            };

            if let Some(missing) = icons.iter().find(|icon| !positions.contains_key(*icon)) {
                return Err(BuildError::UnresolvedImage {
                    family,
                    image: missing.clone(),
                });
            }
            resolved[index] = positions;
        }

        Ok(resolved)
    }
}

fn rescale(parts: &[Vec<Point2<i32>>], scale: f64) -> Vec<Vec<Point2<i32>>> {
    if scale == 1.0 {
        return parts.to_vec();
    }
    parts
        .iter()
        .map(|part| {
            part.iter()
                .map(|p| {
                    Point2::new(
                        (p.x as f64 * scale).round() as i32,
                        (p.y as f64 * scale).round() as i32,
                    )
                })
                .collect()
        })
        .collect()
}

/// Names of every pattern image the layers of `family` reference for the features of `features`.
fn image_dependencies(
    family: &LayerFamily,
    features: Option<&[FeatureProperties]>,
) -> BTreeSet<String> {
    let mut images = BTreeSet::new();

    for layer in &family.layers {
        let Some(paint) = layer.line_paint() else {
            continue;
        };
        match ResolvedLinePaint::new(paint).pattern {
            Some(PossiblyEvaluated::Constant(name)) => {
                images.insert(name);
            }
            Some(pattern @ PossiblyEvaluated::DataDriven { .. }) => {
                for properties in features.unwrap_or_default() {
                    images.insert(pattern.evaluate(properties));
                }
            }
            None => {}
        }
    }

    images.remove("");
    images
}

fn paint_bucket(
    family: &LayerFamily,
    geometry: FamilyGeometry,
    property_data: &PropertyData,
    pattern_positions: HashMap<String, ImagePosition>,
) -> Bucket {
    let empty = FeatureProperties::new();
    let source_layer = family.source_layer.as_str();
    let properties = |feature: usize| property_data.feature(source_layer, feature).unwrap_or(&empty);

    let mut program_options = Vec::with_capacity(family.layers.len());

    let buffers = match geometry {
        FamilyGeometry::Line(layouts) => {
            let paints: Vec<ResolvedLinePaint> = family
                .layers
                .iter()
                .map(|layer| match &layer.paint {
                    Some(LayerPaint::Line(paint)) => ResolvedLinePaint::new(paint),
                    _ => ResolvedLinePaint::new(&Default::default()),
                })
                .collect();
            program_options.extend(paints.iter().map(ProgramOptions::for_line));

            BucketBuffers::Line(
                layouts
                    .into_iter()
                    .map(|layout| {
                        let paint = paints
                            .iter()
                            .map(|paint| {
                                paint_buffer(&layout, |feature| {
                                    line_paint_vertex(paint, properties(feature), &pattern_positions)
                                })
                            })
                            .collect();
                        BufferGroup { layout, paint }
                    })
                    .collect(),
            )
        }
        FamilyGeometry::Fill(layouts) => {
            let paints: Vec<ResolvedFillPaint> = family
                .layers
                .iter()
                .map(|layer| match &layer.paint {
                    Some(LayerPaint::Fill(paint)) => ResolvedFillPaint::new(paint),
                    _ => ResolvedFillPaint::new(&Default::default()),
                })
                .collect();
            program_options.extend(paints.iter().map(ProgramOptions::for_fill));

            BucketBuffers::Fill(
                layouts
                    .into_iter()
                    .map(|layout| {
                        let paint = paints
                            .iter()
                            .map(|paint| {
                                paint_buffer(&layout, |feature| {
                                    let properties = properties(feature);
                                    FillPaintVertex {
                                        color: premultiplied(&paint.color.evaluate(properties)),
                                        opacity: paint.opacity.evaluate(properties),
                                    }
                                })
                            })
                            .collect();
                        BufferGroup { layout, paint }
                    })
                    .collect(),
            )
        }
    };

    Bucket {
        source_layer: family.source_layer.clone(),
        layout: family.layout.clone(),
        layer_ids: family.layer_ids(),
        program_options,
        buffers,
        pattern_positions,
    }
}

/// One paint vertex per layout vertex, evaluated once per feature range.
fn paint_buffer<L, P: Copy + Default>(
    layout: &LayoutGroup<L>,
    mut vertex: impl FnMut(usize) -> P,
) -> Vec<P> {
    let mut buffer = Vec::with_capacity(layout.vertices.len());
    for range in &layout.features {
        let value = vertex(range.feature);
        buffer.resize(range.end as usize, value);
    }
    buffer.resize(layout.vertices.len(), P::default());
    buffer
}

fn line_paint_vertex(
    paint: &ResolvedLinePaint,
    properties: &FeatureProperties,
    pattern_positions: &HashMap<String, ImagePosition>,
) -> LinePaintVertex {
    let mut vertex = LinePaintVertex {
        color: premultiplied(&paint.color.evaluate(properties)),
        width: paint.width.evaluate(properties),
        opacity: paint.opacity.evaluate(properties),
        blur: paint.blur.evaluate(properties),
        offset: paint.offset.evaluate(properties),
        gap_width: paint.gap_width.evaluate(properties),
        ..Default::default()
    };

    let image = paint
        .pattern
        .as_ref()
        .map(|pattern| pattern.evaluate(properties))
        .and_then(|name| pattern_positions.get(&name));
    if let Some(position) = image {
        let texture = [position.tl[0], position.tl[1], position.br[0], position.br[1]];
        vertex.pattern_from = texture;
        vertex.pattern_to = texture;
        vertex.pattern_size = position.size;
    }

    vertex
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use geozero::mvt::tile::GeomType;
    use serde_json::json;

    use super::*;
    use crate::{
        coords::ZoomLevel,
        io::message::channel,
        style::{
            layer::{LineLayout, LinePaint, StyleLayer},
            StyleLayerSet,
        },
        vector::{
            decoder::{decode_tile, PropertyValue},
            encoder::{GeometryEncoder, LayerBuilder},
            family::group_layers,
        },
    };

    fn coords() -> WorldTileCoords {
        WorldTileCoords::from((0, 0, ZoomLevel::from(0)))
    }

    fn roads_tile() -> DecodedTile {
        let mut roads = LayerBuilder::new("roads");
        roads
            .add_feature(
                GeomType::Linestring,
                GeometryEncoder::line_string(&[(0, 0), (100, 0)]),
                &[("kind", PropertyValue::String("primary".to_string()))],
            )
            .add_feature(
                GeomType::Linestring,
                GeometryEncoder::line_string(&[(0, 50), (100, 50), (100, 150)]),
                &[("kind", PropertyValue::String("path".to_string()))],
            );
        decode_tile(&LayerBuilder::encode_tile(vec![roads])).unwrap()
    }

    fn line_layer(id: &str, paint: serde_json::Value) -> StyleLayer {
        StyleLayer::line(
            id,
            "roads",
            LineLayout::default(),
            serde_json::from_value::<LinePaint>(paint).unwrap(),
        )
    }

    #[tokio::test]
    async fn builds_one_bucket_per_family() {
        let (channel, _endpoint) = channel();
        let builder = BucketBuilder::new(Arc::new(channel), PipelineSettings::default());
        let families = group_layers(&[
            line_layer("casing", json!({"line-color": "#000000", "line-width": 4})),
            line_layer("inner", json!({"line-color": "#ffffff", "line-width": 2})),
            StyleLayer::line("water", "water", LineLayout::default(), LinePaint::default()),
        ]);

        let buckets = builder
            .build(coords(), &roads_tile(), &families, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(buckets.buckets.len(), 1);
        let bucket = &buckets.buckets[0];
        assert_eq!(bucket.layer_ids, vec!["casing", "inner"]);

        let groups = bucket.line_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].paint.len(), 2);
        for paint in &groups[0].paint {
            assert_eq!(paint.len(), groups[0].vertex_count());
        }
        assert_eq!(groups[0].paint[0][0].color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(groups[0].paint[1][0].color, [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(groups[0].paint[0][0].width, 4.0);
    }

    #[tokio::test]
    async fn data_driven_paint_differs_per_feature() {
        let (channel, _endpoint) = channel();
        let builder = BucketBuilder::new(Arc::new(channel), PipelineSettings::default());
        let families = group_layers(&[line_layer(
            "roads",
            json!({"line-width": ["match", ["get", "kind"], "primary", 6, 1]}),
        )]);

        let buckets = builder
            .build(coords(), &roads_tile(), &families, &CancellationToken::new())
            .await
            .unwrap();

        let group = &buckets.buckets[0].line_groups().unwrap()[0];
        let ranges = &group.layout.features;
        assert_eq!(ranges.len(), 2);
        assert_eq!(group.paint[0][ranges[0].start as usize].width, 6.0);
        assert_eq!(group.paint[0][ranges[1].start as usize].width, 1.0);
        assert!(!buckets.buckets[0].program_options[0].has_uniform("width"));
    }

    #[tokio::test]
    async fn patterns_are_resolved_over_the_channel() {
        let (channel, endpoint) = channel();
        tokio::spawn(endpoint.serve(|request| match request {
            ResourceRequest::Icons { icons } => Ok(ResourceResponse::Icons(
                icons
                    .iter()
                    .map(|icon| {
                        (
                            icon.clone(),
                            ImagePosition {
                                tl: [0.0, 0.0],
                                br: [0.25, 0.5],
                                size: [8.0, 4.0],
                            },
                        )
                    })
                    .collect(),
            )),
            other => Err(ChannelError::UnexpectedResponse(other.action())),
        }));
        let builder = BucketBuilder::new(Arc::new(channel), PipelineSettings::default());
        let families = group_layers(&[line_layer("rail", json!({"line-pattern": "rail"}))]);

        let buckets = builder
            .build(coords(), &roads_tile(), &families, &CancellationToken::new())
            .await
            .unwrap();

        let bucket = &buckets.buckets[0];
        assert!(bucket.pattern_positions.contains_key("rail"));
        let vertex = bucket.line_groups().unwrap()[0].paint[0][0];
        assert_eq!(vertex.pattern_from, [0.0, 0.0, 0.25, 0.5]);
        assert_eq!(vertex.pattern_size, [8.0, 4.0]);
    }

    #[tokio::test]
    async fn missing_image_fails_the_build() {
        let (channel, endpoint) = channel();
        tokio::spawn(endpoint.serve(|_| Ok(ResourceResponse::Icons(HashMap::new()))));
        let builder = BucketBuilder::new(Arc::new(channel), PipelineSettings::default());
        let families = group_layers(&[line_layer("rail", json!({"line-pattern": "rail"}))]);

        let result = builder
            .build(coords(), &roads_tile(), &families, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(BuildError::UnresolvedImage { image, .. }) if image == "rail"
        ));
    }

    #[tokio::test]
    async fn failed_icon_request_fails_the_build() {
        let (channel, endpoint) = channel();
        tokio::spawn(endpoint.serve(|_| Err(ChannelError::Remote("sprite not loaded".into()))));
        let builder = BucketBuilder::new(Arc::new(channel), PipelineSettings::default());
        let families = group_layers(&[line_layer("rail", json!({"line-pattern": "rail"}))]);

        let result = builder
            .build(coords(), &roads_tile(), &families, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(BuildError::Channel {
                action: "get-icons",
                source: ChannelError::Remote(_),
            })
        ));
    }

    #[tokio::test]
    async fn dropped_icon_request_fails_the_build() {
        let (channel, mut endpoint) = channel();
        tokio::spawn(async move {
            while let Some(request) = endpoint.next().await {
                drop(request);
            }
        });
        let builder = BucketBuilder::new(Arc::new(channel), PipelineSettings::default());
        let families = group_layers(&[
            line_layer("roads", json!({})),
            line_layer("rail", json!({"line-pattern": "rail"})),
        ]);

        let result = builder
            .build(coords(), &roads_tile(), &families, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(BuildError::Channel {
                source: ChannelError::Dropped,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_pending_requests() {
        let (channel, _endpoint) = channel();
        let builder = BucketBuilder::new(Arc::new(channel), PipelineSettings::default());
        let families = group_layers(&[line_layer("rail", json!({"line-pattern": "rail"}))]);
        let cancel = CancellationToken::new();

        let cancel_later = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_later.cancel();
        });

        let result = builder
            .build(coords(), &roads_tile(), &families, &cancel)
            .await;
        assert!(matches!(result, Err(BuildError::Cancelled)));
    }

    #[tokio::test]
    async fn update_rejects_changed_layout() {
        let (channel, _endpoint) = channel();
        let builder = BucketBuilder::new(Arc::new(channel), PipelineSettings::default());
        let style = StyleLayerSet::new(vec![line_layer("roads", json!({}))]);
        let built = builder
            .build(
                coords(),
                &roads_tile(),
                &group_layers(style.layers()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let round = StyleLayer::line(
            "roads",
            "roads",
            LineLayout {
                line_cap: crate::style::layer::LineCap::Round,
                ..Default::default()
            },
            LinePaint::default(),
        );
        let result = builder
            .update_properties(&built, &group_layers(&[round]), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(BuildError::LayoutChanged(id)) if id == "roads"));
    }

    #[test]
    fn paint_buffer_follows_feature_ranges() {
        use crate::tessellation::FeatureRange;

        let layout = LayoutGroup {
            vertices: vec![FillLayoutVertex { pos: [0, 0] }; 5],
            indices: vec![],
            features: vec![
                FeatureRange {
                    feature: 3,
                    start: 0,
                    end: 2,
                },
                FeatureRange {
                    feature: 7,
                    start: 2,
                    end: 5,
                },
            ],
        };

        assert_eq!(paint_buffer(&layout, |feature| feature), vec![3, 3, 7, 7, 7]);
    }

    #[test]
    fn smaller_extents_are_scaled_to_the_tile_extent() {
        let parts = vec![vec![Point2::new(1, 2)]];
        assert_eq!(rescale(&parts, 8.0), vec![vec![Point2::new(8, 16)]]);
    }
}
