use anyhow::{Context, Result};
use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use ndarray::{Array1, Array2, Axis};
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

use super::{euclidean, Clusterer};

pub struct KMeansClusterer {
    pub n_clusters: usize,
    pub seed: u64,
}

impl KMeansClusterer {
    pub fn new(n_clusters: usize, seed: u64) -> KMeansClusterer {
        KMeansClusterer { n_clusters, seed }
    }

    // Returns labels and centroids.
    fn fit(&self, x: &Array2<f64>) -> Result<(Vec<usize>, Array2<f64>)> {
        let samples = DatasetBase::from(x.clone());
        let rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let model = KMeans::params_with_rng(self.n_clusters, rng)
            .n_runs(10)
            .max_n_iterations(300)
            .tolerance(1e-4)
            .fit(&samples)
            .with_context(|| format!("kmeans with {} clusters failed", self.n_clusters))?;

        let labels: Array1<usize> = model.predict(x);
        Ok((labels.to_vec(), model.centroids().clone()))
    }
}

impl Clusterer for KMeansClusterer {
    fn name(&self) -> &str {
        "kmeans"
    }

    fn fit_predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        let (labels, _) = self.fit(x)?;
        Ok(labels)
    }
}

/// Mean Euclidean distance from each sample to its nearest centroid.
pub fn distortion(x: &Array2<f64>, centroids: &Array2<f64>) -> f64 {
    if x.nrows() == 0 {
        return f64::NAN;
    }

    let total: f64 = x
        .axis_iter(Axis(0))
        .map(|row| {
            centroids
                .axis_iter(Axis(0))
                .map(|centroid| euclidean(row, centroid))
                .fold(f64::INFINITY, f64::min)
        })
        .sum();

    return total / x.nrows() as f64;
}

/// Distortion for each k in `ks` that does not exceed the number of samples.
pub fn elbow(x: &Array2<f64>, ks: impl IntoIterator<Item = usize>, seed: u64) -> Result<Vec<(usize, f64)>> {
    let mut curve = Vec::new();
    for k in ks {
        if k == 0 || k > x.nrows() {
            continue;
        }
        let (_, centroids) = KMeansClusterer::new(k, seed).fit(x)?;
        curve.push((k, distortion(x, &centroids)));
    }
    Ok(curve)
}
