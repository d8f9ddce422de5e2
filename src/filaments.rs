use ndarray::{Array2, Axis};
use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};

use crate::star::{DataBlock, StarError};

pub type TubeId = i64;
pub type ClassNumber = i64;

#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    pub tube_id: TubeId,
    pub micrograph: String,
    pub class_number: ClassNumber,
}

/// Column labels used to pull particles out of a STAR block.
#[derive(Clone, Debug)]
pub struct ParticleColumns {
    pub tube_id: String,
    pub micrograph: String,
    pub class_number: String,
}

impl Default for ParticleColumns {
    fn default() -> Self {
        ParticleColumns {
            tube_id: "_rlnHelicalTubeID".to_string(),
            micrograph: "_rlnMicrographName".to_string(),
            class_number: "_rlnClassNumber".to_string(),
        }
    }
}

impl ParticleColumns {
    pub fn labels(&self) -> [&str; 3] {
        [&self.tube_id, &self.micrograph, &self.class_number]
    }
}

// A filament is a helical tube within a single micrograph. Tube ids restart
// in every micrograph so the id alone does not identify a filament.
pub type FilamentKey = (TubeId, String);

#[derive(Debug)]
pub struct FilamentIndex {
    // keys in the order they were assigned, so keys[i] has index i
    pub keys: Vec<FilamentKey>,
    // filament index of every particle, in table order
    pub assignments: Vec<usize>,
}

impl FilamentIndex {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, tube_id: TubeId, micrograph: &str) -> Option<usize> {
        self.keys
            .iter()
            .position(|(t, m)| *t == tube_id && m == micrograph)
    }
}

#[derive(Debug)]
pub struct ClassIndex {
    pub classes: Vec<ClassNumber>,
    pub index: BTreeMap<ClassNumber, usize>,
}

impl ClassIndex {
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn get(&self, class_number: ClassNumber) -> Option<usize> {
        self.index.get(&class_number).copied()
    }
}

/// Particles with lazily computed filament and class enumerations.
pub struct ParticleTable {
    particles: Vec<Particle>,
    filament_ids: OnceCell<FilamentIndex>,
    class_ids: OnceCell<ClassIndex>,
}

impl ParticleTable {
    pub fn new(particles: Vec<Particle>) -> ParticleTable {
        ParticleTable {
            particles,
            filament_ids: OnceCell::new(),
            class_ids: OnceCell::new(),
        }
    }

    pub fn from_star(block: &DataBlock, columns: &ParticleColumns) -> Result<ParticleTable, StarError> {
        let tube_ids = block.parse_column::<TubeId>(&columns.tube_id)?;
        let class_numbers = block.parse_column::<ClassNumber>(&columns.class_number)?;
        let micrograph_col = block.column(&columns.micrograph)?;

        let particles = block
            .rows()
            .iter()
            .zip(tube_ids)
            .zip(class_numbers)
            .map(|((row, tube_id), class_number)| Particle {
                tube_id,
                micrograph: row[micrograph_col].clone(),
                class_number,
            })
            .collect();

        Ok(ParticleTable::new(particles))
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    #[cfg(test)]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Enumerate (tube id, micrograph) pairs in order of first appearance.
    pub fn filament_ids(&self) -> &FilamentIndex {
        self.filament_ids.get_or_init(|| {
            let mut keys = Vec::new();
            let mut index = HashMap::new();
            let mut assignments = Vec::with_capacity(self.particles.len());

            for particle in &self.particles {
                let key = (particle.tube_id, particle.micrograph.clone());
                let next = keys.len();
                let i = *index.entry(key).or_insert_with_key(|key| {
                    keys.push(key.clone());
                    next
                });
                assignments.push(i);
            }

            FilamentIndex { keys, assignments }
        })
    }

    /// Enumerate class numbers in ascending order.
    pub fn class_ids(&self) -> &ClassIndex {
        self.class_ids.get_or_init(|| {
            let mut index: BTreeMap<ClassNumber, usize> = self
                .particles
                .iter()
                .map(|particle| (particle.class_number, 0))
                .collect();
            for (i, v) in index.values_mut().enumerate() {
                *v = i;
            }

            ClassIndex {
                classes: index.keys().cloned().collect(),
                index,
            }
        })
    }

    /// Particle counts, filaments by classes.
    pub fn occurrence_matrix(&self) -> Array2<f64> {
        let filaments = self.filament_ids();
        let classes = self.class_ids();

        let mut counts = Array2::<f64>::zeros((filaments.len(), classes.len()));
        for (particle, &f) in self.particles.iter().zip(&filaments.assignments) {
            if let Some(c) = classes.get(particle.class_number) {
                counts[[f, c]] += 1.0;
            }
        }

        return counts;
    }

    /// Occurrence matrix with every row divided by its sum. Rows summing to
    /// zero come out as NaN.
    pub fn normalized_matrix(&self) -> Array2<f64> {
        normalize_rows(&self.occurrence_matrix())
    }
}

pub fn normalize_rows(counts: &Array2<f64>) -> Array2<f64> {
    let sums = counts.sum_axis(Axis(1)).insert_axis(Axis(1));
    return counts / &sums;
}
