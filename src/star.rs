use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StarError {
    #[error("unable to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected {expected} fields in loop, found {found}")]
    RowLength {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("column '{0}' not found in STAR file")]
    MissingColumn(String),

    #[error("no data block contains all of the columns {0:?}")]
    NoMatchingBlock(Vec<String>),

    #[error("row {row}, column '{column}': unable to parse '{value}'")]
    BadValue {
        row: usize,
        column: String,
        value: String,
    },
}

// A single `data_` block. Key/value pairs and at most one loop are kept,
// which is all RELION writes in a block.
#[derive(Debug, Default, Clone)]
pub struct DataBlock {
    pub name: String,
    pub pairs: HashMap<String, String>,
    labels: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl DataBlock {
    fn new(name: &str) -> DataBlock {
        DataBlock {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn has_column(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn column(&self, label: &str) -> Result<usize, StarError> {
        match self.labels.iter().position(|l| l == label) {
            Some(col) => Ok(col),
            None => Err(StarError::MissingColumn(label.to_string())),
        }
    }

    /// Parse every value of a column, reporting the first failure.
    pub fn parse_column<T: std::str::FromStr>(&self, label: &str) -> Result<Vec<T>, StarError> {
        let col = self.column(label)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row[col].parse::<T>().map_err(|_| StarError::BadValue {
                    row: i,
                    column: label.to_string(),
                    value: row[col].clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct StarFile {
    pub blocks: Vec<DataBlock>,
}

#[derive(Copy, Clone, PartialEq)]
enum State {
    Outside,
    LoopHeader,
    LoopBody,
}

impl StarFile {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<StarFile, StarError> {
        let path = path.as_ref();
        let io_err = |source| StarError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(io_err)?;
        let input: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        StarFile::from_reader(BufReader::new(input)).map_err(|err| match err {
            StarError::Io { source, .. } => io_err(source),
            err => err,
        })
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<StarFile, StarError> {
        let mut star = StarFile::default();
        let mut state = State::Outside;

        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| StarError::Io {
                path: PathBuf::new(),
                source,
            })?;
            let lineno = lineno + 1;
            let fields = tokenize(&line).map_err(|message| StarError::Syntax {
                line: lineno,
                message,
            })?;

            if fields.is_empty() {
                continue;
            }

            let first = fields[0].as_str();
            if let Some(name) = first.strip_prefix("data_") {
                star.blocks.push(DataBlock::new(name));
                state = State::Outside;
                continue;
            }

            let block = match star.blocks.last_mut() {
                Some(block) => block,
                None => {
                    return Err(StarError::Syntax {
                        line: lineno,
                        message: "content before the first data_ block".to_string(),
                    })
                }
            };

            if first == "loop_" {
                if !block.labels.is_empty() {
                    return Err(StarError::Syntax {
                        line: lineno,
                        message: format!("second loop in block '{}'", block.name),
                    });
                }
                state = State::LoopHeader;
                continue;
            }

            match state {
                State::LoopHeader if first.starts_with('_') => {
                    // labels may be followed by a "#n" column number
                    block.labels.push(first.to_string());
                }
                State::LoopHeader | State::LoopBody if !first.starts_with('_') => {
                    state = State::LoopBody;
                    if fields.len() != block.labels.len() {
                        return Err(StarError::RowLength {
                            line: lineno,
                            expected: block.labels.len(),
                            found: fields.len(),
                        });
                    }
                    block.rows.push(fields);
                }
                _ => {
                    state = State::Outside;
                    if !first.starts_with('_') || fields.len() != 2 {
                        return Err(StarError::Syntax {
                            line: lineno,
                            message: format!("unexpected '{}'", line.trim()),
                        });
                    }
                    block.pairs.insert(fields[0].clone(), fields[1].clone());
                }
            }
        }

        Ok(star)
    }

    /// First block containing every one of `labels`.
    pub fn block_with_columns(&self, labels: &[&str]) -> Result<&DataBlock, StarError> {
        self.blocks
            .iter()
            .find(|block| labels.iter().all(|label| block.has_column(label)))
            .ok_or_else(|| {
                StarError::NoMatchingBlock(labels.iter().map(|l| l.to_string()).collect())
            })
    }
}

// Split on whitespace, honouring single or double quotes and dropping
// anything after an unquoted '#' that starts a token.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let c = match chars.next() {
            Some(c) => c,
            None => break,
        };

        if c == '#' {
            // "#12" right after a label is a column number, not a comment,
            // but either way nothing on the line after it matters.
            break;
        }

        let mut field = String::new();
        if c == '"' || c == '\'' {
            let mut closed = false;
            while let Some(d) = chars.next() {
                if d == c && chars.peek().map_or(true, |e| e.is_whitespace()) {
                    closed = true;
                    break;
                }
                field.push(d);
            }
            if !closed {
                return Err(format!("unterminated quote in '{}'", line.trim()));
            }
        } else {
            field.push(c);
            while let Some(&d) = chars.peek() {
                if d.is_whitespace() {
                    break;
                }
                field.push(d);
                chars.next();
            }
        }
        fields.push(field);
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PARTICLES: &str = "
# version 30001

data_optics

loop_
_rlnOpticsGroup #1
_rlnImagePixelSize #2
1 1.06

# version 30001

data_particles

loop_
_rlnMicrographName #1
_rlnHelicalTubeID #2
_rlnClassNumber #3
MotionCorr/job003/mic_001.mrc 1 5
MotionCorr/job003/mic_001.mrc 1 5
\"MotionCorr/job003/mic 002.mrc\" 2 7
";

    #[test]
    fn reads_blocks_and_loops() {
        let star = StarFile::from_reader(PARTICLES.as_bytes()).unwrap();
        assert_eq!(star.blocks.len(), 2);
        assert_eq!(star.blocks[0].name, "optics");
        assert_eq!(star.blocks[1].rows().len(), 3);
        assert_eq!(star.blocks[1].rows()[2][0], "MotionCorr/job003/mic 002.mrc");
    }

    #[test]
    fn finds_block_by_columns() {
        let star = StarFile::from_reader(PARTICLES.as_bytes()).unwrap();
        let block = star
            .block_with_columns(&["_rlnHelicalTubeID", "_rlnClassNumber"])
            .unwrap();
        assert_eq!(block.name, "particles");
        assert_eq!(block.column("_rlnClassNumber").unwrap(), 2);
        assert_eq!(block.parse_column::<i64>("_rlnClassNumber").unwrap(), vec![5, 5, 7]);

        assert!(matches!(
            star.block_with_columns(&["_rlnAngleRot"]),
            Err(StarError::NoMatchingBlock(_))
        ));
    }

    #[test]
    fn reads_key_value_pairs() {
        let text = "data_model_general\n_rlnReferenceDimensionality 2\n_rlnNrClasses 50\n";
        let star = StarFile::from_reader(text.as_bytes()).unwrap();
        assert_eq!(star.blocks[0].pairs["_rlnNrClasses"], "50");
        assert!(star.blocks[0].labels().is_empty());
    }

    #[test]
    fn rejects_short_rows() {
        let text = "data_\nloop_\n_rlnA #1\n_rlnB #2\n1 2\n3\n";
        match StarFile::from_reader(text.as_bytes()) {
            Err(StarError::RowLength { line, expected, found }) => {
                assert_eq!((line, expected, found), (6, 2, 1));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn bad_values_are_reported() {
        let text = "data_\nloop_\n_rlnClassNumber #1\n3\nthree\n";
        let star = StarFile::from_reader(text.as_bytes()).unwrap();
        assert!(matches!(
            star.blocks[0].parse_column::<i64>("_rlnClassNumber"),
            Err(StarError::BadValue { row: 1, .. })
        ));
    }

    #[test]
    fn reads_gzipped_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("particles.star.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(PARTICLES.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let star = StarFile::read(&path).unwrap();
        assert_eq!(star.blocks[1].rows().len(), 3);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = StarFile::read("/nonexistent/particles.star").unwrap_err();
        assert!(matches!(err, StarError::Io { .. }));
    }
}
