//! End-to-end scenarios driving the whole pipeline through `run::execute`.
use lsh_knn::comm::Communicator;
use lsh_knn::io::binary::{read_rank_rows, write_gathered};
use lsh_knn::io::ParserKind;
use lsh_knn::layout::{Aos, Soa};
use lsh_knn::options::HashFamilyKind;
use lsh_knn::run::{execute, Job};
use lsh_knn::utils::create_rng;
use pretty_assertions::assert_eq;
use rand::Rng;
use std::path::{Path, PathBuf};

fn write_points(path: &Path, total: usize, dims: usize, values: &[f32]) {
    assert_eq!(values.len(), total * dims);
    let comms = Communicator::split(1);
    write_gathered::<f32, u32>(path, total, dims, values, &comms[0]).unwrap();
}

/// Exact nearest neighbors by brute force: IDs in ascending distance order
/// and distances with the square root applied, both point-major.
fn brute_force(values: &[f32], total: usize, dims: usize, k: usize) -> (Vec<u32>, Vec<f32>) {
    let mut ids = Vec::with_capacity(total * k);
    let mut dists = Vec::with_capacity(total * k);
    for p in 0..total {
        let mut candidates: Vec<(f32, usize)> = (0..total)
            .filter(|&q| q != p)
            .map(|q| {
                let mut acc = 0.0f32;
                for d in 0..dims {
                    let diff = values[p * dims + d] - values[q * dims + d];
                    acc += diff * diff;
                }
                (acc, q)
            })
            .collect();
        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        for (dist, id) in candidates.into_iter().take(k) {
            ids.push(id as u32);
            dists.push(dist.sqrt());
        }
    }
    (ids, dists)
}

/// Random points without distance ties.
fn random_points(total: usize, dims: usize, seed: u64) -> Vec<f32> {
    let mut rng = create_rng(seed);
    (0..total * dims).map(|_| rng.gen_range(0.0..100.0)).collect()
}

fn exact_job(data_file: PathBuf, k: usize, num_workers: usize) -> Job {
    let mut job: Job = Job::new(data_file, k, num_workers);
    // a single bucket per table turns the approximate search exact
    job.options.hash_pool_size = 4;
    job.options.num_hash_functions = 2;
    job.options.num_hash_tables = 2;
    job.options.hash_table_size = 1;
    job.options.seed = 1;
    job
}

fn read_rows<T: lsh_knn::scalar::LeBytes>(path: &Path) -> (usize, usize, Vec<T>) {
    read_rank_rows::<T, u32>(path, 0, 1).unwrap()
}

#[test]
fn small_single_worker_run_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("points.bin");
    let points = vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 10.0, 10.0, 11.0, 10.0];
    write_points(&data, 5, 2, &points);

    let run = |tag: &str| -> (Vec<u32>, Vec<f32>) {
        let ids_file = dir.path().join(format!("ids_{tag}.bin"));
        let dists_file = dir.path().join(format!("dists_{tag}.bin"));
        let mut job = exact_job(data.clone(), 2, 1);
        job.knn_save_file = Some(ids_file.clone());
        job.knn_dist_save_file = Some(dists_file.clone());
        execute::<f32, u32, u32, Aos>(&job).unwrap();

        let (rows, cols, ids) = read_rows::<u32>(&ids_file);
        assert_eq!((rows, cols), (5, 2));
        let (_, _, dists) = read_rows::<f32>(&dists_file);
        (ids, dists)
    };

    let (ids_a, dists_a) = run("a");
    let (ids_b, dists_b) = run("b");

    // the distances are reproducible bit for bit; neighbor sets as well
    // (slot order between equidistant neighbors is the only freedom)
    assert_eq!(dists_a, dists_b);
    for p in 0..5 {
        let mut set_a = ids_a[p * 2..(p + 1) * 2].to_vec();
        let mut set_b = ids_b[p * 2..(p + 1) * 2].to_vec();
        set_a.sort_unstable();
        set_b.sort_unstable();
        assert_eq!(set_a, set_b);
    }

    // the two tight clusters are recovered
    let mut n0 = ids_a[0..2].to_vec();
    n0.sort_unstable();
    assert_eq!(n0, vec![1, 2]);
    assert!(ids_a[6..8].contains(&4));
}

#[test]
fn two_workers_find_cross_shard_neighbors() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("points.bin");
    // points i and i + 4 sit 1 apart, same-shard points 100 apart
    let mut points = Vec::new();
    for i in 0..4 {
        points.extend_from_slice(&[i as f32 * 10.0, 0.0]);
    }
    for i in 0..4 {
        points.extend_from_slice(&[i as f32 * 10.0, 1.0]);
    }
    write_points(&data, 8, 2, &points);

    let ids_file = dir.path().join("ids.bin");
    let mut job = exact_job(data, 1, 2);
    job.knn_save_file = Some(ids_file.clone());
    execute::<f32, u32, u32, Aos>(&job).unwrap();

    let (_, _, ids) = read_rows::<u32>(&ids_file);
    assert_eq!(ids, vec![4, 5, 6, 7, 0, 1, 2, 3]);
}

#[test]
fn uneven_sharding_keeps_results_clean() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("points.bin");
    // 7 points over 2 workers: worker 1 holds 3 real points and 1 padded
    // duplicate of point 6
    let points: Vec<f32> = (0..7).flat_map(|v| [(1u32 << v) as f32, 0.0]).collect();
    write_points(&data, 7, 2, &points);

    let ids_file = dir.path().join("ids.bin");
    let mut job = exact_job(data, 2, 2);
    job.knn_save_file = Some(ids_file.clone());
    execute::<f32, u32, u32, Aos>(&job).unwrap();

    let (rows, cols, ids) = read_rows::<u32>(&ids_file);
    assert_eq!((rows, cols), (7, 2));
    for p in 0..7 {
        let row = &ids[p * 2..(p + 1) * 2];
        // no self neighbors (in particular point 6 never sees its padded
        // duplicate) and no duplicate IDs
        assert!(!row.contains(&(p as u32)));
        assert_ne!(row[0], row[1]);
        assert!(row.iter().all(|&id| id < 7));
    }
}

#[test]
fn all_zero_points_with_entropy_family() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("points.bin");
    write_points(&data, 16, 2, &vec![0.0; 32]);

    let ids_file = dir.path().join("ids.bin");
    let dists_file = dir.path().join("dists.bin");
    let mut job: Job = Job::new(data, 2, 4);
    job.options.hash_family = HashFamilyKind::EntropyBased;
    job.options.hash_pool_size = 4;
    job.options.num_hash_functions = 2;
    job.options.num_hash_tables = 2;
    job.options.hash_table_size = 8;
    job.options.num_cut_off_points = 4;
    job.options.seed = 3;
    job.knn_save_file = Some(ids_file.clone());
    job.knn_dist_save_file = Some(dists_file.clone());
    execute::<f32, u32, u32, Aos>(&job).unwrap();

    let (_, _, ids) = read_rows::<u32>(&ids_file);
    let (_, _, dists) = read_rows::<f32>(&dists_file);
    // every point is everyone's neighbor at distance 0; the result must
    // still be k distinct non-self IDs per point
    assert!(dists.iter().all(|&d| d == 0.0));
    for p in 0..16 {
        let row = &ids[p * 2..(p + 1) * 2];
        assert!(!row.contains(&(p as u32)));
        assert_ne!(row[0], row[1]);
    }
}

#[test]
fn recall_against_ground_truth() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("points.bin");
    let (total, dims, k) = (24, 4, 3);
    let points = random_points(total, dims, 7);
    write_points(&data, total, dims, &points);

    let (true_ids, true_dists) = brute_force(&points, total, dims, k);
    let gt_ids = dir.path().join("true_ids.bin");
    let gt_dists = dir.path().join("true_dists.bin");
    let comms = Communicator::split(1);
    write_gathered::<u32, u32>(&gt_ids, total, k, &true_ids, &comms[0]).unwrap();
    write_gathered::<f32, u32>(&gt_dists, total, k, &true_dists, &comms[0]).unwrap();

    // exact configuration: everything collides, recall is perfect
    let mut good = exact_job(data.clone(), k, 2);
    good.evaluate_knn_file = Some(gt_ids.clone());
    good.evaluate_knn_dist_file = Some(gt_dists.clone());
    let good_report = execute::<f32, u32, u32, Aos>(&good).unwrap();
    let good_recall = good_report.recall.unwrap();
    assert!(good_recall >= 90.0);
    assert!((good_report.error_ratio.unwrap() - 1.0).abs() < 1e-5);
    assert_eq!(good_report.points_with_missing, 0);

    // deliberately poor configuration: one heavily selective table
    let mut poor: Job = Job::new(data, k, 2);
    poor.options.hash_pool_size = 32;
    poor.options.num_hash_functions = 20;
    poor.options.num_hash_tables = 1;
    poor.options.w = 0.25;
    poor.options.seed = 1;
    poor.evaluate_knn_file = Some(gt_ids.clone());
    let poor_report = execute::<f32, u32, u32, Aos>(&poor).unwrap();
    let poor_recall = poor_report.recall.unwrap();
    assert!(poor_recall <= good_recall);

    // probing extra buckets only grows the candidate sets, so the recall
    // of the same configuration never drops
    let mut probing = poor;
    probing.options.num_multi_probes = 20;
    probing.evaluate_knn_file = Some(gt_ids);
    let probing_report = execute::<f32, u32, u32, Aos>(&probing).unwrap();
    assert!(probing_report.recall.unwrap() >= poor_recall);
}

#[test]
fn saved_files_round_trip_through_the_evaluator() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("points.bin");
    let (total, dims, k) = (18, 3, 2);
    let points = random_points(total, dims, 11);
    write_points(&data, total, dims, &points);

    let ids_file = dir.path().join("ids.bin");
    let dists_file = dir.path().join("dists.bin");
    let mut first = exact_job(data.clone(), k, 3);
    first.knn_save_file = Some(ids_file.clone());
    first.knn_dist_save_file = Some(dists_file.clone());
    execute::<f32, u32, u32, Aos>(&first).unwrap();

    // a second, identical run evaluated against the saved files reproduces
    // them exactly
    let mut second = exact_job(data, k, 3);
    second.evaluate_knn_file = Some(ids_file);
    second.evaluate_knn_dist_file = Some(dists_file);
    let report = execute::<f32, u32, u32, Aos>(&second).unwrap();
    assert_eq!(report.recall.unwrap(), 100.0);
    assert!((report.error_ratio.unwrap() - 1.0).abs() < 1e-5);
    assert_eq!(report.missing_slots, 0);
}

#[test]
fn aos_and_soa_runs_agree() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("points.bin");
    let (total, dims, k) = (20, 3, 3);
    let points = random_points(total, dims, 13);
    write_points(&data, total, dims, &points);

    let run_aos = dir.path().join("aos.bin");
    let run_soa = dir.path().join("soa.bin");

    let mut job = exact_job(data.clone(), k, 2);
    job.knn_save_file = Some(run_aos.clone());
    execute::<f32, u32, u32, Aos>(&job).unwrap();

    let mut job = exact_job(data, k, 2);
    job.knn_save_file = Some(run_soa.clone());
    execute::<f32, u32, u32, Soa>(&job).unwrap();

    let (_, _, ids_aos) = read_rows::<u32>(&run_aos);
    let (_, _, ids_soa) = read_rows::<u32>(&run_soa);
    assert_eq!(ids_aos, ids_soa);
}

#[test]
fn arff_input_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("points.arff");
    let mut text = String::from("@RELATION points\n@ATTRIBUTE x NUMERIC\n@ATTRIBUTE y NUMERIC\n@DATA\n");
    for i in 0..6 {
        text.push_str(&format!("{}.0,0.0\n", i * i));
    }
    std::fs::write(&data, text).unwrap();

    let ids_file = dir.path().join("ids.bin");
    let mut job = exact_job(data, 1, 2);
    job.parser = ParserKind::Arff;
    job.knn_save_file = Some(ids_file.clone());
    execute::<f32, u32, u32, Aos>(&job).unwrap();

    let (rows, cols, ids) = read_rows::<u32>(&ids_file);
    assert_eq!((rows, cols), (6, 1));
    // x = i^2: the nearest neighbor of every point is its predecessor,
    // except for the first two points
    assert_eq!(ids, vec![1, 0, 1, 2, 3, 4]);
}
