use std::fs;
use std::path::PathBuf;

use image::{Rgba, RgbaImage};
use tickcap::{
    interpolation, AreaDescriptor, BlockKind, ExportCompletion, ExportedFrame, FrameRenderer,
    FrameRequest, GridPos, ProgressOverride, ProgressSlot, Region, RenderError, Vec3,
};
use tracing::debug;

use super::world::{piston_facing, SceneState, SharedScene};

const MAX_IMAGE_SIDE: u32 = 4096;
// Projected spans within this of a whole pixel count are not rounded up.
const SPAN_EPSILON: f64 = 1e-6;
const CELL_FILL: f64 = 0.9;
const HEAD_FILL: f64 = 0.45;

const BACKGROUND: Rgba<u8> = Rgba([24, 26, 32, 255]);
const SOLID: Rgba<u8> = Rgba([128, 128, 128, 255]);
const PISTON_BASE: Rgba<u8> = Rgba([120, 84, 48, 255]);
const PISTON_HEAD: Rgba<u8> = Rgba([196, 160, 96, 255]);
const MOVING_BLOCK: Rgba<u8> = Rgba([64, 120, 200, 255]);
const OPENABLE: Rgba<u8> = Rgba([90, 150, 70, 255]);

#[derive(Debug, Clone, Copy)]
struct Projection {
    center: Vec3,
    scale: f64,
    sin_rotation: f64,
    cos_rotation: f64,
    sin_slant: f64,
    cos_slant: f64,
    origin: (f64, f64),
}

impl Projection {
    fn new(region: &Region, area: &AreaDescriptor) -> Self {
        let rotation = area.rotation_degrees.to_radians();
        let slant = area.slant_degrees.to_radians();
        let mut projection = Self {
            center: region.center(),
            scale: area.scale,
            sin_rotation: rotation.sin(),
            cos_rotation: rotation.cos(),
            sin_slant: slant.sin(),
            cos_slant: slant.cos(),
            origin: (0.0, 0.0),
        };
        let (min_x, min_y, _, _) = projection.bounds(region);
        projection.origin = (min_x, min_y);
        projection
    }

    fn raw(&self, point: Vec3) -> (f64, f64) {
        let local = point.sub(self.center);
        let x = local.x * self.cos_rotation - local.z * self.sin_rotation;
        let z = local.x * self.sin_rotation + local.z * self.cos_rotation;
        let y = z * self.cos_slant - local.y * self.sin_slant;
        (x * self.scale, y * self.scale)
    }

    fn bounds(&self, region: &Region) -> (f64, f64, f64, f64) {
        let (min, max) = (region.min(), region.max());
        let mut bounds = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for x in [min.x, max.x] {
            for y in [min.y, max.y] {
                for z in [min.z, max.z] {
                    let (px, py) = self.raw(Vec3::new(x, y, z));
                    bounds = (
                        bounds.0.min(px),
                        bounds.1.min(py),
                        bounds.2.max(px),
                        bounds.3.max(py),
                    );
                }
            }
        }
        bounds
    }

    fn image_size(&self, region: &Region) -> (u32, u32) {
        let (min_x, min_y, max_x, max_y) = self.bounds(region);
        let side = |span: f64| ((span - SPAN_EPSILON).ceil().max(1.0) as u32).min(MAX_IMAGE_SIDE);
        (side(max_x - min_x), side(max_y - min_y))
    }

    fn project(&self, point: Vec3) -> (f64, f64) {
        let (x, y) = self.raw(point);
        (x - self.origin.0, y - self.origin.1)
    }
}

pub(crate) struct SoftwareRenderer {
    scene: SharedScene,
    staging_dir: PathBuf,
}

impl SoftwareRenderer {
    pub(crate) fn new(scene: SharedScene, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            scene,
            staging_dir: staging_dir.into(),
        }
    }

    fn export(&self, request: &FrameRequest) -> Result<ExportedFrame, RenderError> {
        let image = draw_frame(&self.scene.read(), request)?;
        fs::create_dir_all(&self.staging_dir).map_err(|source| RenderError::Io {
            path: self.staging_dir.clone(),
            source,
        })?;
        let path = self
            .staging_dir
            .join(format!("render_{:05}.png", request.frame.frame_index));
        image.save(&path).map_err(|source| RenderError::Export {
            path: path.clone(),
            source,
        })?;
        Ok(ExportedFrame { path })
    }
}

impl ProgressOverride for SoftwareRenderer {
    fn progress_slots(&self) -> Vec<ProgressSlot> {
        self.scene.progress_slots()
    }

    fn set_progress(&mut self, id: GridPos, progress: f32) {
        self.scene.set_progress(id, progress);
    }
}

impl FrameRenderer for SoftwareRenderer {
    fn request_frame(&mut self, request: FrameRequest, completion: ExportCompletion) {
        let result = self.export(&request);
        if let Ok(exported) = &result {
            debug!(
                frame_index = request.frame.frame_index,
                delta = request.frame.sub_tick_delta,
                path = %exported.path.display(),
                "demo_frame_rendered"
            );
        }
        completion.complete(result);
    }
}

pub(crate) fn draw_frame(
    scene: &SceneState,
    request: &FrameRequest,
) -> Result<RgbaImage, RenderError> {
    if !(request.area.scale.is_finite() && request.area.scale > 0.0) {
        return Err(RenderError::Render {
            frame_index: request.frame.frame_index,
            message: format!("invalid scale {}", request.area.scale),
        });
    }
    let projection = Projection::new(&request.region, &request.area);
    let (width, height) = projection.image_size(&request.region);
    let mut image = RgbaImage::from_pixel(width, height, BACKGROUND);

    let mut cells: Vec<GridPos> = request.region.cells().collect();
    cells.sort_by_key(|pos| pos.y);
    let mut heads = Vec::new();
    for pos in cells {
        let sample = scene.block_at(pos);
        match sample.kind {
            BlockKind::Air => {}
            BlockKind::Solid => fill_cell(&mut image, &projection, pos.center(), CELL_FILL, SOLID),
            BlockKind::Door { .. } | BlockKind::Trapdoor { .. } | BlockKind::FenceGate { .. } => {
                fill_cell(&mut image, &projection, pos.center(), CELL_FILL, OPENABLE)
            }
            BlockKind::Piston { .. } | BlockKind::PistonHead { .. } => {
                fill_cell(&mut image, &projection, pos.center(), CELL_FILL, PISTON_BASE);
                if let Some(facing) = piston_facing(scene, pos) {
                    let offset = if interpolation::is_active() {
                        interpolation::offset_for(pos)
                    } else {
                        facing.scaled(f64::from(sample.motion_progress.unwrap_or(0.0)))
                    };
                    heads.push(pos.center().add(offset));
                }
            }
            BlockKind::MovingBlock { .. } => {
                let center = pos.center().add(interpolation::offset_for(pos));
                fill_cell(&mut image, &projection, center, CELL_FILL, MOVING_BLOCK);
            }
        }
    }
    for head in heads {
        fill_cell(&mut image, &projection, head, HEAD_FILL, PISTON_HEAD);
    }
    Ok(image)
}

fn fill_cell(
    image: &mut RgbaImage,
    projection: &Projection,
    center: Vec3,
    fill: f64,
    color: Rgba<u8>,
) {
    let (cx, cy) = projection.project(center);
    let half = projection.scale * fill * 0.5;
    let (width, height) = (f64::from(image.width()), f64::from(image.height()));
    let span = |low: f64, high: f64, limit: f64| {
        (
            low.floor().clamp(0.0, limit) as u32,
            high.ceil().clamp(0.0, limit) as u32,
        )
    };
    let (x0, x1) = span(cx - half, cx + half, width);
    let (y0, y1) = span(cy - half, cy + half, height);
    for y in y0..y1 {
        for x in x0..x1 {
            image.put_pixel(x, y, color);
        }
    }
}
