//! Eigenface face recognizer.
//!
//! Principal component analysis over the training gallery, computed through
//! the small n×n Gram matrix so cost stays bounded by the gallery size, then
//! nearest-neighbour matching of projected faces.

use crate::types::{Prediction, UNKNOWN_LABEL};
use image::GrayImage;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, Axis};
use thiserror::Error;

/// Iteration cap handed to the symmetric eigen solver.
const EIGEN_MAX_ITERATIONS: usize = 10_000;
/// Eigenvalues below this fraction of the largest one are treated as zero.
const EIGENVALUE_REL_TOLERANCE: f64 = 1e-10;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("{images} training images but {labels} labels")]
    LengthMismatch { images: usize, labels: usize },
    #[error("training image {index} is {actual:?}, expected {expected:?}")]
    SizeMismatch {
        index: usize,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("training image {0} uses label 0, which is reserved for unknown faces")]
    ReservedLabel(usize),
    #[error("eigen decomposition did not converge within {0} iterations")]
    Decomposition(usize),
    #[error("query face is {actual:?}, model was trained on {expected:?}")]
    QuerySize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Training knobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EigenfaceParams {
    /// Upper bound on retained eigenfaces. 0 keeps every non-degenerate component.
    pub max_components: usize,
    /// Predictions farther than this are reported as [`UNKNOWN_LABEL`]. `None` accepts any distance.
    pub distance_threshold: Option<f64>,
}

/// Projection space learned from a non-empty gallery.
#[derive(Debug, Clone)]
struct Subspace {
    size: (u32, u32),
    mean: Array1<f64>,
    /// d × k matrix of unit eigenfaces, strongest first. `None` when the
    /// gallery has rank 0; faces are then compared as mean-centered pixels.
    eigenfaces: Option<Array2<f64>>,
    eigenvalues: Vec<f64>,
    /// One projected row per training face.
    projections: Array2<f64>,
    labels: Vec<u32>,
}

impl Subspace {
    fn project(&self, face: &GrayImage) -> Array1<f64> {
        let centered = flatten(face) - &self.mean;
        match &self.eigenfaces {
            Some(basis) => centered.dot(basis),
            None => centered,
        }
    }
}

/// Trained eigenface classifier. Immutable once built; retraining builds a new one.
#[derive(Debug, Clone)]
pub struct EigenfaceModel {
    params: EigenfaceParams,
    /// `None` for an empty gallery: every prediction is unknown.
    subspace: Option<Subspace>,
}

impl EigenfaceModel {
    /// Fit a model to `images` (all the same size) with parallel `labels` (all > 0).
    ///
    /// An empty gallery is valid and yields a model that predicts unknown for every face.
    pub fn train(
        images: &[GrayImage],
        labels: &[u32],
        params: EigenfaceParams,
    ) -> Result<Self, RecognizerError> {
        if images.len() != labels.len() {
            return Err(RecognizerError::LengthMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }
        let Some(first) = images.first() else {
            return Ok(Self {
                params,
                subspace: None,
            });
        };

        let size = first.dimensions();
        for (index, (image, &label)) in images.iter().zip(labels).enumerate() {
            if image.dimensions() != size {
                return Err(RecognizerError::SizeMismatch {
                    index,
                    expected: size,
                    actual: image.dimensions(),
                });
            }
            if label == UNKNOWN_LABEL {
                return Err(RecognizerError::ReservedLabel(index));
            }
        }

        let n = images.len();
        let d = (size.0 * size.1) as usize;
        let mut data = Array2::<f64>::zeros((n, d));
        for (mut row, image) in data.rows_mut().into_iter().zip(images) {
            row.assign(&flatten(image));
        }

        let mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(d));
        let centered = &data - &mean;

        // Eigenvectors of A·Aᵀ map to eigenfaces through Aᵀ.
        let gram = centered.dot(&centered.t());
        let (values, vectors) = symmetric_eigen(&gram)?;

        let largest = values.first().copied().unwrap_or(0.0);
        let limit = if params.max_components == 0 {
            n
        } else {
            params.max_components
        };
        let keep: Vec<usize> = (0..values.len())
            .filter(|&k| values[k] > 0.0 && values[k] > largest * EIGENVALUE_REL_TOLERANCE)
            .take(limit)
            .collect();

        let (eigenfaces, projections) = if keep.is_empty() {
            (None, centered.clone())
        } else {
            let mut basis = Array2::<f64>::zeros((d, keep.len()));
            for (col, &k) in keep.iter().enumerate() {
                let face = centered.t().dot(&vectors.column(k));
                let norm = face.dot(&face).sqrt();
                if norm > 0.0 {
                    basis.column_mut(col).assign(&(face / norm));
                }
            }
            let projections = centered.dot(&basis);
            (Some(basis), projections)
        };

        let eigenvalues: Vec<f64> = keep.iter().map(|&k| values[k]).collect();

        tracing::debug!(
            samples = n,
            pixels = d,
            components = eigenvalues.len(),
            "eigenface subspace computed"
        );

        Ok(Self {
            params,
            subspace: Some(Subspace {
                size,
                mean,
                eigenfaces,
                eigenvalues,
                projections,
                labels: labels.to_vec(),
            }),
        })
    }

    /// Label of the nearest training face and the distance to it. Lower distance = better.
    pub fn predict(&self, face: &GrayImage) -> Result<Prediction, RecognizerError> {
        let Some(space) = &self.subspace else {
            return Ok(Prediction::unknown());
        };
        if face.dimensions() != space.size {
            return Err(RecognizerError::QuerySize {
                expected: space.size,
                actual: face.dimensions(),
            });
        }

        let query = space.project(face);
        let mut best: Option<(usize, f64)> = None;
        for (i, row) in space.projections.rows().into_iter().enumerate() {
            let diff = &row - &query;
            let distance = diff.dot(&diff).sqrt();
            // Strict comparison: the first training face wins ties.
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        let Some((index, distance)) = best else {
            return Ok(Prediction::unknown());
        };

        let accepted = self
            .params
            .distance_threshold
            .map_or(true, |limit| distance <= limit);

        Ok(Prediction {
            label: if accepted {
                space.labels[index]
            } else {
                UNKNOWN_LABEL
            },
            distance,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.subspace.as_ref().map_or(0, |s| s.labels.len())
    }

    /// Number of retained eigenfaces.
    pub fn component_count(&self) -> usize {
        self.subspace.as_ref().map_or(0, |s| s.eigenvalues.len())
    }
}

/// Flatten a grayscale face into a row vector of intensities.
fn flatten(face: &GrayImage) -> Array1<f64> {
    face.as_raw().iter().map(|&p| p as f64).collect()
}

/// Eigen-decomposition of the symmetric Gram matrix.
///
/// Returns eigenvalues in decreasing order and the matching unit eigenvectors
/// as columns.
fn symmetric_eigen(gram: &Array2<f64>) -> Result<(Vec<f64>, Array2<f64>), RecognizerError> {
    let n = gram.nrows();
    let matrix = DMatrix::from_fn(n, n, |i, j| gram[[i, j]]);
    let eigen = SymmetricEigen::try_new(matrix, f64::EPSILON, EIGEN_MAX_ITERATIONS)
        .ok_or(RecognizerError::Decomposition(EIGEN_MAX_ITERATIONS))?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[j].total_cmp(&eigen.eigenvalues[i]));

    let values = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    let vectors = Array2::from_shape_fn((n, n), |(row, col)| eigen.eigenvectors[(row, order[col])]);

    Ok((values, vectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use ndarray::array;

    const SIZE: u32 = 8;

    fn pattern(seed: u32) -> GrayImage {
        GrayImage::from_fn(SIZE, SIZE, |x, y| {
            Luma([((x * seed * 31 + y * (seed + 7) * 17 + seed * 11) % 256) as u8])
        })
    }

    fn gallery() -> (Vec<GrayImage>, Vec<u32>) {
        let images = (1..=6).map(pattern).collect();
        let labels = vec![1, 1, 2, 2, 3, 3];
        (images, labels)
    }

    #[test]
    fn test_symmetric_eigen_2x2() {
        let (values, vectors) = symmetric_eigen(&array![[2.0, 1.0], [1.0, 2.0]]).unwrap();
        assert!((values[0] - 3.0).abs() < 1e-10, "got {values:?}");
        assert!((values[1] - 1.0).abs() < 1e-10, "got {values:?}");
        // Leading eigenvector ∝ (1, 1)
        let v0 = vectors.column(0);
        assert!((v0[0].abs() - v0[1].abs()).abs() < 1e-10);
        assert!((v0.dot(&v0) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_symmetric_eigen_reconstructs() {
        let m = array![
            [4.0, 1.0, 2.0, 0.5],
            [1.0, 3.0, 0.0, 1.0],
            [2.0, 0.0, 5.0, 1.5],
            [0.5, 1.0, 1.5, 2.0],
        ];
        let (values, vectors) = symmetric_eigen(&m).unwrap();
        for (k, &lambda) in values.iter().enumerate() {
            let v = vectors.column(k);
            let mv = m.dot(&v);
            for i in 0..4 {
                assert!((mv[i] - lambda * v[i]).abs() < 1e-8);
            }
        }
        assert!(values.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_symmetric_eigen_diagonal_sorted() {
        let (values, _) = symmetric_eigen(&array![[1.0, 0.0], [0.0, 7.0]]).unwrap();
        assert!((values[0] - 7.0).abs() < 1e-12 && (values[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_gallery_predicts_unknown() {
        let model = EigenfaceModel::train(&[], &[], EigenfaceParams::default()).unwrap();
        assert_eq!(model.sample_count(), 0);
        let p = model.predict(&pattern(3)).unwrap();
        assert_eq!(p, Prediction::unknown());
    }

    #[test]
    fn test_self_recognition() {
        let (images, labels) = gallery();
        let model = EigenfaceModel::train(&images, &labels, EigenfaceParams::default()).unwrap();
        for (image, &label) in images.iter().zip(&labels) {
            let p = model.predict(image).unwrap();
            assert_eq!(p.label, label);
            assert!(p.distance < 1e-6, "self distance {}", p.distance);
        }
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let (images, labels) = gallery();
        let a = EigenfaceModel::train(&images, &labels, EigenfaceParams::default()).unwrap();
        let b = EigenfaceModel::train(&images, &labels, EigenfaceParams::default()).unwrap();
        let query = pattern(11);
        let first = a.predict(&query).unwrap();
        assert_eq!(first, a.predict(&query).unwrap());
        assert_eq!(first, b.predict(&query).unwrap());
    }

    #[test]
    fn test_perturbed_face_matches_source_label() {
        let (images, labels) = gallery();
        let model = EigenfaceModel::train(&images, &labels, EigenfaceParams::default()).unwrap();
        let mut query = images[3].clone();
        for x in 0..4 {
            let p = query.get_pixel_mut(x, 2);
            p.0[0] = p.0[0].saturating_add(3);
        }
        let p = model.predict(&query).unwrap();
        assert_eq!(p.label, 2);
    }

    #[test]
    fn test_single_sample_gallery() {
        let model =
            EigenfaceModel::train(&[pattern(5)], &[4], EigenfaceParams::default()).unwrap();
        assert_eq!(model.component_count(), 0);
        let own = model.predict(&pattern(5)).unwrap();
        assert_eq!(own.label, 4);
        assert!(own.distance < 1e-9);
        let other = model.predict(&pattern(9)).unwrap();
        assert_eq!(other.label, 4);
        assert!(other.distance > own.distance);
    }

    #[test]
    fn test_distance_threshold_maps_to_unknown() {
        let (images, labels) = gallery();
        let params = EigenfaceParams {
            distance_threshold: Some(1.0),
            ..EigenfaceParams::default()
        };
        let model = EigenfaceModel::train(&images, &labels, params).unwrap();
        assert_eq!(model.predict(&images[0]).unwrap().label, 1);
        let far = model.predict(&GrayImage::from_pixel(SIZE, SIZE, Luma([255]))).unwrap();
        assert_eq!(far.label, UNKNOWN_LABEL);
        assert!(far.distance > 1.0);
    }

    #[test]
    fn test_max_components_caps_subspace() {
        let (images, labels) = gallery();
        let params = EigenfaceParams {
            max_components: 2,
            ..EigenfaceParams::default()
        };
        let model = EigenfaceModel::train(&images, &labels, params).unwrap();
        assert_eq!(model.component_count(), 2);
        assert_eq!(model.sample_count(), 6);
    }

    #[test]
    fn test_full_rank_keeps_n_minus_one_components() {
        let (images, labels) = gallery();
        let model = EigenfaceModel::train(&images, &labels, EigenfaceParams::default()).unwrap();
        assert!(model.component_count() <= images.len() - 1);
        assert!(model.component_count() >= 1);
    }

    #[test]
    fn test_train_rejects_length_mismatch() {
        let (images, _) = gallery();
        assert!(matches!(
            EigenfaceModel::train(&images, &[1, 2], EigenfaceParams::default()),
            Err(RecognizerError::LengthMismatch { images: 6, labels: 2 })
        ));
    }

    #[test]
    fn test_train_rejects_reserved_label() {
        assert!(matches!(
            EigenfaceModel::train(&[pattern(1), pattern(2)], &[1, 0], EigenfaceParams::default()),
            Err(RecognizerError::ReservedLabel(1))
        ));
    }

    #[test]
    fn test_train_rejects_mixed_sizes() {
        let odd = GrayImage::new(SIZE + 1, SIZE);
        assert!(matches!(
            EigenfaceModel::train(&[pattern(1), odd], &[1, 2], EigenfaceParams::default()),
            Err(RecognizerError::SizeMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_predict_rejects_wrong_size() {
        let (images, labels) = gallery();
        let model = EigenfaceModel::train(&images, &labels, EigenfaceParams::default()).unwrap();
        assert!(matches!(
            model.predict(&GrayImage::new(4, 4)),
            Err(RecognizerError::QuerySize { .. })
        ));
    }
}
