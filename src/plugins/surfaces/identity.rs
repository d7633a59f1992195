//! Surface identity: sample a grayscale map at a UV and turn luma into a surface ID.

use std::sync::{Arc, Mutex, PoisonError};

use bevy::platform::collections::HashMap;
use bevy::prelude::*;

/// Material property consulted when a struck entity has no `ImpactSurface`.
pub const DEFAULT_MATERIAL_PROPERTY: &str = "surface_id_map";

/// Row-major luma values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayscaleMap {
    width: u32,
    height: u32,
    luma: Vec<f32>,
}

impl GrayscaleMap {
    /// `None` if the dimensions are zero or don't match the data.
    pub fn from_luma(width: u32, height: u32, luma: Vec<f32>) -> Option<Self> {
        if width == 0 || height == 0 || luma.len() != (width * height) as usize {
            return None;
        }
        Some(Self { width, height, luma })
    }

    /// A map where every texel encodes `surface_id`.
    pub fn uniform(surface_id: u8) -> Self {
        Self {
            width: 1,
            height: 1,
            luma: vec![f32::from(surface_id) / 255.0],
        }
    }

    /// Luma of every texel of a CPU-readable image. `None` when the pixel data is
    /// missing (render-world only) or the format can't be read back.
    pub fn from_image(image: &Image) -> Option<Self> {
        let width = image.width();
        let height = image.height();
        let mut luma = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                luma.push(texel_luma(image.get_color_at(x, y).ok()?));
            }
        }
        Self::from_luma(width, height, luma)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn texel(&self, x: i64, y: i64) -> f32 {
        let x = x.rem_euclid(i64::from(self.width)) as usize;
        let y = y.rem_euclid(i64::from(self.height)) as usize;
        self.luma[y * self.width as usize + x]
    }

    /// Bilinear sample at texel centres with repeat wrapping.
    pub fn sample_bilinear(&self, uv: Vec2) -> f32 {
        let fx = uv.x * self.width as f32 - 0.5;
        let fy = uv.y * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.texel(x0, y0) * (1.0 - tx) + self.texel(x0 + 1, y0) * tx;
        let bottom = self.texel(x0, y0 + 1) * (1.0 - tx) + self.texel(x0 + 1, y0 + 1) * tx;
        top * (1.0 - ty) + bottom * ty
    }

    pub fn surface_id_at(&self, uv: Vec2) -> u8 {
        luma_to_surface_id(self.sample_bilinear(uv))
    }
}

/// Rec. 601 luma of the stored channel values. IDs are authored as raw gray
/// levels, so sRGB-encoded texels are read as encoded, not linearized.
fn texel_luma(color: Color) -> f32 {
    let [r, g, b] = match color {
        Color::Srgba(c) => [c.red, c.green, c.blue],
        Color::LinearRgba(c) => [c.red, c.green, c.blue],
        other => {
            let c = other.to_srgba();
            [c.red, c.green, c.blue]
        }
    };
    0.299 * r + 0.587 * g + 0.114 * b
}

pub fn luma_to_surface_id(luma: f32) -> u8 {
    if luma.is_nan() {
        return 0;
    }
    (luma * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Per-entity surface identity settings.
#[derive(Component, Debug, Clone)]
pub struct ImpactSurface {
    /// Sampled first when set.
    pub map: Option<Arc<GrayscaleMap>>,
    /// Name of the `SurfaceMaterial` texture to sample when `map` is unset.
    pub material_property: String,
    pub default_surface_id: u8,
}

impl Default for ImpactSurface {
    fn default() -> Self {
        Self {
            map: None,
            material_property: DEFAULT_MATERIAL_PROPERTY.to_string(),
            default_surface_id: 0,
        }
    }
}

impl ImpactSurface {
    pub fn constant(surface_id: u8) -> Self {
        Self {
            default_surface_id: surface_id,
            ..default()
        }
    }

    pub fn with_map(map: GrayscaleMap) -> Self {
        Self {
            map: Some(Arc::new(map)),
            ..default()
        }
    }
}

/// Named textures of the struck surface's material.
#[derive(Component, Debug, Clone, Default)]
pub struct SurfaceMaterial {
    pub textures: HashMap<String, Handle<Image>>,
}

impl SurfaceMaterial {
    pub fn with_texture(mut self, name: impl Into<String>, image: Handle<Image>) -> Self {
        self.textures.insert(name.into(), image);
        self
    }

    pub fn texture(&self, name: &str) -> Option<&Handle<Image>> {
        self.textures.get(name)
    }
}

/// Grayscale conversions of material images, built on first sample.
#[derive(Resource, Default, Debug)]
pub struct SurfaceMapCache {
    maps: Mutex<HashMap<AssetId<Image>, Arc<GrayscaleMap>>>,
}

impl SurfaceMapCache {
    /// Cached map for `id`, converting `image` on a miss. Unreadable images are
    /// not cached so a later upload can still succeed.
    pub fn get_or_convert(&self, id: AssetId<Image>, image: &Image) -> Option<Arc<GrayscaleMap>> {
        let mut maps = self.maps.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(map) = maps.get(&id) {
            return Some(Arc::clone(map));
        }
        let map = Arc::new(GrayscaleMap::from_image(image)?);
        maps.insert(id, Arc::clone(&map));
        Some(map)
    }

    pub fn invalidate(&self, id: AssetId<Image>) -> bool {
        self.maps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Pick the map to sample, falling back to the configured default ID.
///
/// `material_map` looks up a named texture on the struck surface's material.
pub fn resolve_surface_id(
    surface: Option<&ImpactSurface>,
    material_map: impl FnOnce(&str) -> Option<Arc<GrayscaleMap>>,
    uv: Vec2,
) -> u8 {
    let (property, default_id) = match surface {
        Some(surface) => {
            if let Some(map) = surface.map.as_deref() {
                return map.surface_id_at(uv);
            }
            (surface.material_property.as_str(), surface.default_surface_id)
        }
        None => (DEFAULT_MATERIAL_PROPERTY, 0),
    };

    material_map(property).map_or(default_id, |map| map.surface_id_at(uv))
}
