use anyhow::{bail, Result};
use kodama::{linkage, Method};
use ndarray::{Array2, Axis};

use super::{canonical_labels, euclidean, Clusterer};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Linkage {
    Ward,
    Complete,
    Average,
}

impl Linkage {
    pub fn name(&self) -> &'static str {
        match self {
            Linkage::Ward => "ward",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
        }
    }

    fn method(&self) -> Method {
        match self {
            Linkage::Ward => Method::Ward,
            Linkage::Complete => Method::Complete,
            Linkage::Average => Method::Average,
        }
    }
}

/// Bottom-up agglomerative clustering cut at `n_clusters` clusters.
pub struct Agglomerative {
    pub n_clusters: usize,
    pub linkage: Linkage,
    name: String,
}

impl Agglomerative {
    pub fn new(n_clusters: usize, linkage: Linkage) -> Agglomerative {
        Agglomerative {
            n_clusters,
            linkage,
            name: format!("hierarchical ({})", linkage.name()),
        }
    }
}

// Upper triangle of the Euclidean distance matrix, row by row, which is the
// layout kodama expects.
fn condensed_distances(x: &Array2<f64>) -> Vec<f64> {
    let n = x.nrows();
    let mut condensed = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for (i, a) in x.axis_iter(Axis(0)).enumerate() {
        for b in x.axis_iter(Axis(0)).skip(i + 1) {
            condensed.push(euclidean(a, b));
        }
    }
    condensed
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

impl Clusterer for Agglomerative {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit_predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        let n = x.nrows();
        if self.n_clusters == 0 || self.n_clusters > n {
            bail!(
                "cannot form {} clusters from {} samples",
                self.n_clusters,
                n
            );
        }
        if x.iter().any(|v| !v.is_finite()) {
            bail!("input contains non-finite values");
        }

        let mut condensed = condensed_distances(x);
        let dendrogram = linkage(&mut condensed, n, self.linkage.method());

        // Step i of the dendrogram creates cluster n + i. Replaying the
        // first n - k merges leaves k clusters.
        let mut parent: Vec<usize> = (0..2 * n).collect();
        for (i, step) in dendrogram.steps().iter().take(n - self.n_clusters).enumerate() {
            parent[step.cluster1] = n + i;
            parent[step.cluster2] = n + i;
        }

        let roots: Vec<usize> = (0..n).map(|i| find(&mut parent, i)).collect();
        Ok(canonical_labels(&roots))
    }
}
