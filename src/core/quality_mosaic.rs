use crate::types::{AlignError, AlignResult, Millis};
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

/// Output bands kept from each scene, in order
pub const MOSAIC_BANDS: [&str; 4] = ["R", "G", "B", "N"];

/// Compositing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeParams {
    pub bands: Vec<String>,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            bands: MOSAIC_BANDS.iter().map(|b| b.to_string()).collect(),
        }
    }
}

/// Per-scene quality index `1 / time_distance`.
///
/// A zero distance (same-instant acquisition) gets the largest finite index.
pub fn quality_index(time_distance: Millis) -> f64 {
    if time_distance == 0 {
        f64::MAX
    } else {
        1.0 / (time_distance.unsigned_abs() as f64)
    }
}

/// One scene resampled onto the output grid
pub struct MosaicLayer<'a> {
    pub id: &'a str,
    pub quality: f64,
    pub band_names: &'a [String],
    /// (bands, rows, cols)
    pub bands: ArrayView3<'a, u8>,
    /// Per-band validity, same shape as `bands`
    pub valid: ArrayView3<'a, bool>,
}

/// Per-pixel quality mosaic
pub struct QualityMosaic {
    bands: Vec<String>,
}

impl QualityMosaic {
    pub fn new(params: CompositeParams) -> Self {
        Self { bands: params.bands }
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Composite the layers into `(bands + 1, rows, cols)`; the last band is the mask.
    ///
    /// At each pixel the covering layer (any band valid) with the highest
    /// quality wins, ties going to the smallest identifier. The mask is 1
    /// where every selected band of the winner is valid.
    pub fn composite(&self, layers: &[MosaicLayer]) -> AlignResult<Array3<u8>> {
        let first = layers
            .first()
            .ok_or_else(|| AlignError::InvalidData("Cannot composite an empty ensemble".to_string()))?;
        let (_, rows, cols) = first.bands.dim();

        let mut band_indices = Vec::with_capacity(layers.len());
        for layer in layers {
            let (_, r, c) = layer.bands.dim();
            if (r, c) != (rows, cols) || layer.valid.dim() != layer.bands.dim() {
                return Err(AlignError::InvalidData(format!(
                    "Layer {} is not on the mosaic grid ({}x{} expected)",
                    layer.id, cols, rows
                )));
            }
            band_indices.push(self.select_bands(layer)?);
        }

        // Fixed preference order so equal quality always resolves the same way
        let mut order: Vec<usize> = (0..layers.len()).collect();
        order.sort_by(|&a, &b| {
            layers[b]
                .quality
                .total_cmp(&layers[a].quality)
                .then_with(|| layers[a].id.cmp(layers[b].id))
        });

        let n_bands = self.bands.len();
        let mut output = Array3::<u8>::zeros((n_bands + 1, rows, cols));

        for row in 0..rows {
            for col in 0..cols {
                let winner = order.iter().copied().find(|&i| {
                    band_indices[i].iter().any(|&b| layers[i].valid[[b, row, col]])
                });

                if let Some(i) = winner {
                    let layer = &layers[i];
                    let mut all_valid = true;
                    for (out_band, &b) in band_indices[i].iter().enumerate() {
                        output[[out_band, row, col]] = layer.bands[[b, row, col]];
                        all_valid &= layer.valid[[b, row, col]];
                    }
                    output[[n_bands, row, col]] = u8::from(all_valid);
                }
            }
        }

        Ok(output)
    }

    fn select_bands(&self, layer: &MosaicLayer) -> AlignResult<Vec<usize>> {
        self.bands
            .iter()
            .map(|name| {
                layer
                    .band_names
                    .iter()
                    .position(|b| b == name)
                    .filter(|&i| i < layer.bands.dim().0)
                    .ok_or_else(|| {
                        AlignError::InvalidData(format!("Scene {} has no band {}", layer.id, name))
                    })
            })
            .collect()
    }
}

impl Default for QualityMosaic {
    fn default() -> Self {
        Self::new(CompositeParams::default())
    }
}
