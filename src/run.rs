//! Orchestration of one search job: spawn the workers, run the pipeline on
//! each, gather the master's quality report.
use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::evaluate;
use crate::hash::{EntropyBased, LshHash, Mixed, RandomProjections};
use crate::io::{self, ParserKind};
use crate::knn::Knn;
use crate::layout::MemoryLayout;
use crate::options::{HashFamilyKind, Options};
use crate::ring;
use crate::scalar::{HashWord, Index, Real};
use crate::shard::Shard;
use crate::table::HashTables;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info};

/// Everything one search run needs.
pub struct Job<R = f32, I = u32, H = u32> {
    pub data_file: PathBuf,
    pub parser: ParserKind,
    pub k: usize,
    pub num_workers: usize,
    pub options: Options<R, I, H>,
    pub knn_save_file: Option<PathBuf>,
    pub knn_dist_save_file: Option<PathBuf>,
    pub evaluate_knn_file: Option<PathBuf>,
    pub evaluate_knn_dist_file: Option<PathBuf>,
}

impl<R: Real, I: Index, H: HashWord> Job<R, I, H> {
    /// A job with default options and no save/evaluate files.
    pub fn new(data_file: impl Into<PathBuf>, k: usize, num_workers: usize) -> Self {
        Job {
            data_file: data_file.into(),
            parser: ParserKind::Binary,
            k,
            num_workers,
            options: Options::default(),
            knn_save_file: None,
            knn_dist_save_file: None,
            evaluate_knn_file: None,
            evaluate_knn_dist_file: None,
        }
    }
}

/// Quality numbers produced by the master worker when ground-truth files
/// were given.
#[derive(Clone, Copy, Debug, Default)]
pub struct QualityReport {
    pub recall: Option<f64>,
    pub error_ratio: Option<f64>,
    pub points_with_missing: usize,
    pub missing_slots: usize,
}

/// Run the whole job: one worker thread per shard, message passing in
/// between. Returns the master's report.
pub fn execute<R, I, H, L>(job: &Job<R, I, H>) -> Result<QualityReport>
where
    R: Real,
    I: Index,
    H: HashWord,
    L: MemoryLayout,
{
    job.options.validate()?;
    if job.num_workers == 0 {
        return Err(Error::Config("num_workers must be at least 1".to_string()));
    }

    let comms = Communicator::split(job.num_workers);
    thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| scope.spawn(move || worker::<R, I, H, L>(job, comm)))
            .collect();

        let mut report = Err(Error::Config("the master worker produced no report".to_string()));
        let mut failure: Option<Error> = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(Some(master_report))) => report = Ok(master_report),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => failure = failure.or(Some(e)),
                Err(_) => {
                    failure =
                        failure.or_else(|| Some(Error::Disconnected("worker thread panicked".to_string())))
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => report,
        }
    })
}

fn worker<R, I, H, L>(job: &Job<R, I, H>, comm: Communicator) -> Result<Option<QualityReport>>
where
    R: Real,
    I: Index,
    H: HashWord,
    L: MemoryLayout,
{
    let opt = &job.options;
    let (attr, point_major) =
        io::read_points::<R, I>(&job.data_file, job.parser, comm.rank(), comm.size())?;
    debug!(
        rank = comm.rank(),
        total_size = attr.total_size,
        rank_size = attr.rank_size,
        dims = attr.dims,
        "parsed data file"
    );
    let mut shard = Shard::<R, L>::new(attr, point_major);

    let knn = match opt.hash_family {
        HashFamilyKind::RandomProjections => {
            let family = RandomProjections::<R, H, L>::build(opt, attr, &comm)?;
            pipeline(job, &mut shard, family, &comm)?
        }
        HashFamilyKind::EntropyBased => {
            let family = EntropyBased::<R, H, L>::build(opt, &shard, &comm)?;
            pipeline(job, &mut shard, family, &comm)?
        }
        HashFamilyKind::Mixed => {
            let family = Mixed::<R, H, L>::build(opt, &shard, &comm)?;
            pipeline(job, &mut shard, family, &comm)?
        }
    };

    let correct_rank_size = attr.correct_rank_size(comm.rank(), comm.size());
    if let Some(path) = &job.knn_save_file {
        io::binary::write_gathered::<I, I>(
            path,
            attr.total_size,
            knn.k(),
            &knn.ids_point_major(correct_rank_size),
            &comm,
        )?;
        if comm.is_master() {
            info!(file = %path.display(), "saved neighbor IDs");
        }
    }
    if let Some(path) = &job.knn_dist_save_file {
        io::binary::write_gathered::<R, I>(
            path,
            attr.total_size,
            knn.k(),
            &knn.dists_point_major_sqrt(correct_rank_size),
            &comm,
        )?;
        if comm.is_master() {
            info!(file = %path.display(), "saved neighbor distances");
        }
    }

    let mut report = QualityReport::default();
    if let Some(path) = &job.evaluate_knn_file {
        let (rows, cols, correct_ids) =
            io::binary::read_rank_rows::<I, I>(path, comm.rank(), comm.size())?;
        check_ground_truth(path, rows, cols, attr.total_size, knn.k())?;
        let recall = evaluate::recall(&knn, &correct_ids, &comm)?;
        report.recall = recall.to_f64();
        if comm.is_master() {
            if let Some(value) = report.recall {
                info!(recall = value, "recall [%]");
            }
        }
    }
    if let Some(path) = &job.evaluate_knn_dist_file {
        let (rows, cols, correct_dists) =
            io::binary::read_rank_rows::<R, I>(path, comm.rank(), comm.size())?;
        check_ground_truth(path, rows, cols, attr.total_size, knn.k())?;
        let er = evaluate::error_ratio(&knn, &correct_dists, &comm)?;
        report.error_ratio = er.ratio.to_f64();
        report.points_with_missing = er.points_with_missing;
        report.missing_slots = er.missing_slots;
        if comm.is_master() {
            if let Some(value) = report.error_ratio {
                info!(
                    error_ratio = value,
                    points_with_missing = er.points_with_missing,
                    missing_slots = er.missing_slots,
                    "error ratio"
                );
            }
        }
    }

    Ok(if comm.is_master() { Some(report) } else { None })
}

fn pipeline<R, I, H, L, F>(
    job: &Job<R, I, H>,
    shard: &mut Shard<R, L>,
    family: F,
    comm: &Communicator,
) -> Result<Knn<R, I, L>>
where
    R: Real,
    I: Index,
    H: HashWord,
    L: MemoryLayout,
    F: LshHash<R, H>,
{
    let tables = HashTables::build(&job.options, shard, family, comm.rank(), comm.size())?;
    if tracing::enabled!(tracing::Level::DEBUG) {
        debug!(rank = comm.rank(), stats = %tables.describe(), "hash tables built");
    }
    ring::search(&tables, shard, job.k, comm)
}

fn check_ground_truth(
    path: &Path,
    rows: usize,
    cols: usize,
    total_size: usize,
    k: usize,
) -> Result<()> {
    if rows != total_size {
        return Err(Error::DataFile {
            file: path.display().to_string(),
            reason: format!(
                "the total number of points is {}, but should be {}",
                rows, total_size
            ),
        });
    }
    if cols != k {
        return Err(Error::DataFile {
            file: path.display().to_string(),
            reason: format!("the number of nearest neighbors is {}, but should be {}", cols, k),
        });
    }
    Ok(())
}
