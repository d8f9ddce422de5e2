use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

mod cluster;
mod filaments;
mod plot;
mod star;

use cluster::{elbow, run_all, standard_clusterers, Pca, Projection};
use filaments::{ParticleColumns, ParticleTable};
use star::StarFile;

#[derive(Parser, Debug)]
#[command(name = "filament-clusters")]
#[command(version, about = "Clusters helical particles from 2D classification.")]
struct Args {
    /// Input STAR files with particles and micrograph names.
    #[arg(required = true)]
    input_star: Vec<PathBuf>,

    /// Do not open the figures after writing them.
    #[arg(short = 'b', long = "no-display")]
    no_display: bool,

    #[arg(short = 'k', long, default_value_t = 2)]
    clusters: usize,

    /// Largest number of clusters tried for the elbow curve.
    #[arg(long, default_value_t = 9)]
    max_k: usize,

    #[arg(long, default_value_t = 2)]
    seed: u64,

    #[arg(long, default_value = "_rlnHelicalTubeID")]
    tube_column: String,

    #[arg(long, default_value = "_rlnMicrographName")]
    micrograph_column: String,

    #[arg(long, default_value = "_rlnClassNumber")]
    class_column: String,

    /// Replaces the input's extension to name the figure.
    #[arg(long, default_value = "_clusters.png")]
    figure_suffix: String,

    /// Also write the normalized matrix as <input>_matrix.csv.
    #[arg(long)]
    matrix_csv: bool,
}

// "a/b/run_it025_data.star.gz" -> "a/b/run_it025_data<suffix>"
fn derived_path(input: &Path, suffix: &str) -> PathBuf {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    let stem = match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    };
    input.with_file_name(format!("{}{}", stem, suffix))
}

fn write_matrix_csv(path: &Path, table: &ParticleTable, normalized: &ndarray::Array2<f64>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Unable to create '{}'", path.display()))?;

    let mut header = vec![
        "filament".to_string(),
        "tube_id".to_string(),
        "micrograph".to_string(),
    ];
    header.extend(table.class_ids().classes.iter().map(|c| c.to_string()));
    writer.write_record(&header)?;

    for (f, (tube_id, micrograph)) in table.filament_ids().keys.iter().enumerate() {
        let mut record = vec![f.to_string(), tube_id.to_string(), micrograph.clone()];
        record.extend(normalized.row(f).iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn show_figure(path: &Path) {
    let viewer = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
    if let Err(err) = Command::new(viewer).arg(path).spawn() {
        warn!("Unable to display '{}' with {}: {}", path.display(), viewer, err);
    }
}

fn process_file(path: &Path, args: &Args) -> Result<()> {
    let columns = ParticleColumns {
        tube_id: args.tube_column.clone(),
        micrograph: args.micrograph_column.clone(),
        class_number: args.class_column.clone(),
    };

    let star = StarFile::read(path)?;
    let block = star.block_with_columns(&columns.labels())?;
    let table = ParticleTable::from_star(block, &columns)
        .with_context(|| format!("Unable to read particles from '{}'", path.display()))?;
    info!("Read {} particles from {}", table.len(), path.display());
    if table.is_empty() {
        warn!("Skipping {}: no particles", path.display());
        return Ok(());
    }

    let filaments = table.filament_ids();
    let classes = table.class_ids();
    info!(
        "Found {} filaments over {} classes",
        filaments.len(),
        classes.len()
    );

    println!("Filament ids:");
    for (i, (tube_id, micrograph)) in filaments.keys.iter().enumerate() {
        println!("  {}: tube {} in {}", i, tube_id, micrograph);
    }
    println!("Class ids:");
    for (i, class_number) in classes.classes.iter().enumerate() {
        println!("  {}: class {}", i, class_number);
    }

    let normalized = table.normalized_matrix();
    println!("{:.3}", normalized);

    if args.matrix_csv {
        write_matrix_csv(&derived_path(path, "_matrix.csv"), &table, &normalized)?;
    }

    let projection = match Pca::new(2).project(&normalized) {
        Ok(projection) => projection,
        Err(err) => {
            warn!("Skipping {}: cannot project matrix ({})", path.display(), err);
            return Ok(());
        }
    };

    let results = run_all(&standard_clusterers(args.clusters, args.seed), &normalized)?;
    for result in &results {
        println!("{} clustering", result.name);
        println!("{:?}", result.labels);
    }

    let curve = elbow(&normalized, 1..=args.max_k, args.seed)?;
    println!("Elbow distortions:");
    for (k, distortion) in &curve {
        println!("  k={}: {:.4}", k, distortion);
    }

    let figure = derived_path(path, &args.figure_suffix);
    plot::render_figure(&figure, &projection, &results, &curve, &normalized)
        .with_context(|| format!("Unable to write figure '{}'", figure.display()))?;
    info!("Wrote {}", figure.display());

    if !args.no_display {
        show_figure(&figure);
    }

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    for path in &args.input_star {
        process_file(path, &args)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::fs;

    #[test]
    fn derived_paths() {
        assert_eq!(
            derived_path(Path::new("a/b/run_it025_data.star"), "_clusters.png"),
            PathBuf::from("a/b/run_it025_data_clusters.png")
        );
        assert_eq!(
            derived_path(Path::new("particles.star.gz"), "_matrix.csv"),
            PathBuf::from("particles_matrix.csv")
        );
        assert_eq!(
            derived_path(Path::new("noext"), "_clusters.png"),
            PathBuf::from("noext_clusters.png")
        );
    }

    fn args_for(path: &Path) -> Args {
        Args::parse_from([
            OsStr::new("filament-clusters"),
            OsStr::new("--no-display"),
            OsStr::new("--matrix-csv"),
            path.as_os_str(),
        ])
    }

    #[test]
    fn cli_defaults() {
        let args = Args::parse_from(["filament-clusters", "a.star", "b.star"]);
        assert_eq!(args.input_star.len(), 2);
        assert_eq!(args.clusters, 2);
        assert_eq!(args.max_k, 9);
        assert!(!args.no_display);
        assert!(Args::try_parse_from(["filament-clusters"]).is_err());
    }

    #[test]
    fn unprojectable_input_is_skipped() {
        // one class only: a single feature column
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one_class.star");
        fs::write(
            &path,
            "data_particles\nloop_\n_rlnMicrographName #1\n_rlnHelicalTubeID #2\n_rlnClassNumber #3\nm1 1 3\nm1 2 3\nm2 1 3\n",
        )
        .unwrap();

        process_file(&path, &args_for(&path)).unwrap();
        assert!(dir.path().join("one_class_matrix.csv").exists());
        assert!(!dir.path().join("one_class_clusters.png").exists());
    }

    #[test]
    fn figure_is_written_next_to_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fig.star");
        fs::write(
            &path,
            "data_particles\nloop_\n_rlnMicrographName #1\n_rlnHelicalTubeID #2\n_rlnClassNumber #3\n\
             m1 1 1\nm1 1 1\nm1 1 2\nm1 2 3\nm1 2 3\nm2 1 1\nm2 2 2\nm2 2 3\n",
        )
        .unwrap();

        process_file(&path, &args_for(&path)).unwrap();
        assert!(dir.path().join("fig_clusters.png").exists());
        assert!(fs::metadata(dir.path().join("fig_clusters.png")).unwrap().len() > 0);

        let csv = fs::read_to_string(dir.path().join("fig_matrix.csv")).unwrap();
        assert_eq!(csv.lines().count(), 5);
    }

    #[test]
    fn star_without_particles_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.star");
        fs::write(
            &path,
            "data_particles\nloop_\n_rlnMicrographName #1\n_rlnHelicalTubeID #2\n_rlnClassNumber #3\n",
        )
        .unwrap();

        process_file(&path, &args_for(&path)).unwrap();
        assert!(!dir.path().join("empty_matrix.csv").exists());
    }

    #[test]
    fn matrix_csv_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.star");
        fs::write(
            &path,
            "data_particles\nloop_\n_rlnMicrographName #1\n_rlnHelicalTubeID #2\n_rlnClassNumber #3\nA 1 5\nA 1 5\nA 2 7\n",
        )
        .unwrap();
        let star = StarFile::read(&path).unwrap();
        let table = ParticleTable::from_star(&star.blocks[0], &ParticleColumns::default()).unwrap();
        let out = dir.path().join("p_matrix.csv");
        write_matrix_csv(&out, &table, &table.normalized_matrix()).unwrap();

        let text = fs::read_to_string(&out).unwrap();
        assert_eq!(text, "filament,tube_id,micrograph,5,7\n0,1,A,1,0\n1,2,A,0,1\n");
    }

    #[test]
    fn missing_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.star");
        fs::write(&path, "data_\nloop_\n_rlnClassNumber #1\n1\n").unwrap();
        assert!(process_file(&path, &args_for(&path)).is_err());
    }
}
