pub mod hierarchical;
pub mod kmeans;
pub mod pca;

use anyhow::Result;
use ndarray::{Array2, ArrayView1};

pub use hierarchical::{Agglomerative, Linkage};
pub use kmeans::{elbow, KMeansClusterer};
pub use pca::{Pca, ProjectionError};

/// Anything that assigns each row of a matrix to a cluster.
pub trait Clusterer {
    fn name(&self) -> &str;
    fn fit_predict(&self, x: &Array2<f64>) -> Result<Vec<usize>>;
}

/// Reduce rows of a matrix to a lower dimensional embedding.
pub trait Projection {
    fn project(&self, x: &Array2<f64>) -> Result<Array2<f64>, ProjectionError>;
}

pub struct ClusterResult {
    pub name: String,
    pub labels: Vec<usize>,
}

pub fn standard_clusterers(n_clusters: usize, seed: u64) -> Vec<Box<dyn Clusterer>> {
    vec![
        Box::new(KMeansClusterer::new(n_clusters, seed)),
        Box::new(Agglomerative::new(n_clusters, Linkage::Ward)),
        Box::new(Agglomerative::new(n_clusters, Linkage::Complete)),
        Box::new(Agglomerative::new(n_clusters, Linkage::Average)),
    ]
}

pub fn run_all(clusterers: &[Box<dyn Clusterer>], x: &Array2<f64>) -> Result<Vec<ClusterResult>> {
    clusterers
        .iter()
        .map(|clusterer| {
            Ok(ClusterResult {
                name: clusterer.name().to_string(),
                labels: clusterer.fit_predict(x)?,
            })
        })
        .collect()
}

pub fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(u, v)| (u - v) * (u - v))
        .sum::<f64>()
        .sqrt()
}

// Renumber labels so clusters are numbered by first appearance.
pub fn canonical_labels(labels: &[usize]) -> Vec<usize> {
    let mut seen = std::collections::HashMap::new();
    labels
        .iter()
        .map(|&l| {
            let next = seen.len();
            *seen.entry(l).or_insert(next)
        })
        .collect()
}
