use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_reduction::{Pca as LinfaPca, ReductionError};
use ndarray::Array2;
use thiserror::Error;

use super::Projection;

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("{found} samples is too few for {components} components")]
    TooFewSamples { found: usize, components: usize },

    #[error("{found} features is too few for {components} components")]
    TooFewFeatures { found: usize, components: usize },

    #[error("input contains non-finite values")]
    NonFinite,

    #[error(transparent)]
    Reduction(#[from] ReductionError),
}

/// Principal component analysis, as done by linfa.
pub struct Pca {
    pub n_components: usize,
}

impl Pca {
    pub fn new(n_components: usize) -> Pca {
        Pca { n_components }
    }

    fn check(&self, x: &Array2<f64>) -> Result<(), ProjectionError> {
        let (nsamples, nfeatures) = x.dim();
        if nsamples < self.n_components {
            return Err(ProjectionError::TooFewSamples {
                found: nsamples,
                components: self.n_components,
            });
        }
        if nfeatures < self.n_components {
            return Err(ProjectionError::TooFewFeatures {
                found: nfeatures,
                components: self.n_components,
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ProjectionError::NonFinite);
        }
        Ok(())
    }
}

impl Projection for Pca {
    fn project(&self, x: &Array2<f64>) -> Result<Array2<f64>, ProjectionError> {
        self.check(x)?;

        let samples = DatasetBase::from(x.clone());
        let model = LinfaPca::params(self.n_components).fit(&samples)?;
        let embedding: Array2<f64> = model.predict(x);
        Ok(embedding)
    }
}
