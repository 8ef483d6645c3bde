//! Builds the results archive for a task (spec.md §4.5): Slurm
//! stdout/stderr/script plus every user-declared logs/results path,
//! deflate-compressed into a single zip.

use broker_core::Task;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Debug, Error)]
pub enum PackagerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub fn archive_filename(task_id: &str) -> String {
    format!("{task_id}_results.zip")
}

/// Build the archive for `task` and write it to `dest_path`. The
/// workdir is resolved the same way the Local Submitter resolves it:
/// absolute as given, or `upload_root/workdir` otherwise.
pub fn build_archive(task: &Task, dest_path: &Path) -> Result<(), PackagerError> {
    let workdir = task.resolved_workdir();
    let file = File::create(dest_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    add_slurm_artifact(&mut zip, &options, &workdir, &task.task_id, "out")?;
    add_slurm_artifact(&mut zip, &options, &workdir, &task.task_id, "err")?;
    add_slurm_artifact(&mut zip, &options, &workdir, &task.task_id, "sh")?;

    let mut seen = std::collections::BTreeSet::new();
    for rel in task.logs_paths.iter().chain(task.results_paths.iter()) {
        if !seen.insert(rel.clone()) {
            continue;
        }
        add_user_path(&mut zip, &options, &workdir, rel)?;
    }

    zip.finish()?;
    Ok(())
}

fn add_slurm_artifact(
    zip: &mut ZipWriter<File>,
    options: &SimpleFileOptions,
    workdir: &Path,
    task_id: &str,
    ext: &str,
) -> Result<(), PackagerError> {
    let src = workdir.join(".slurm").join(format!("{task_id}.{ext}"));
    if !src.is_file() {
        return Ok(()); // missing artifacts are skipped silently
    }
    let archive_path = format!("slurm/{task_id}.{ext}");
    write_file_entry(zip, options, &src, &archive_path)
}

fn add_user_path(
    zip: &mut ZipWriter<File>,
    options: &SimpleFileOptions,
    workdir: &Path,
    rel: &str,
) -> Result<(), PackagerError> {
    let abs = workdir.join(rel);
    if abs.is_file() {
        write_file_entry(zip, options, &abs, rel)?;
    } else if abs.is_dir() {
        for entry in walkdir::WalkDir::new(&abs).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel_to_workdir = entry
                .path()
                .strip_prefix(workdir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            write_file_entry(zip, options, entry.path(), &rel_to_workdir)?;
        }
    }
    // missing paths are skipped silently, per spec.md §4.5 step 3.
    Ok(())
}

fn write_file_entry(
    zip: &mut ZipWriter<File>,
    options: &SimpleFileOptions,
    src: &Path,
    archive_path: &str,
) -> Result<(), PackagerError> {
    let mut buf = Vec::new();
    File::open(src)?.read_to_end(&mut buf)?;
    zip.start_file(archive_path, *options)?;
    zip.write_all(&buf)?;
    Ok(())
}

/// Default directory result archives are materialized into before
/// being streamed back to the caller.
pub fn default_archive_path(data_dir: &Path, task_id: &str) -> PathBuf {
    data_dir.join("logs").join(archive_filename(task_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::{Target, TaskStatus};

    fn sample_task(workdir: &Path) -> Task {
        Task {
            task_id: "T1".into(),
            username: "alice".into(),
            target: Target::Local,
            status: TaskStatus::Completed,
            slurm_job_id: Some("42".into()),
            upload_root: workdir.to_string_lossy().into_owned(),
            ignore: vec![],
            workdir: ".".into(),
            commands: vec!["echo hi".into()],
            logs_paths: vec!["train.log".into()],
            results_paths: vec!["out".into()],
            gpus: 0,
            cpus: 1,
            memory: "1G".into(),
            time_limit: "0:01:00".into(),
            partition: None,
            created_at: 0,
            updated_at: 0,
            started_at: Some(0),
            completed_at: Some(1),
            exit_code: Some(0),
        }
    }

    #[test]
    fn archive_contains_exactly_the_expected_entries() {
        let tmp = tempdir();
        let workdir = tmp.join("proj");
        std::fs::create_dir_all(workdir.join(".slurm")).unwrap();
        std::fs::create_dir_all(workdir.join("out").join("nested")).unwrap();

        std::fs::File::create(workdir.join(".slurm/T1.out")).unwrap();
        std::fs::File::create(workdir.join(".slurm/T1.err")).unwrap();
        std::fs::File::create(workdir.join(".slurm/T1.sh")).unwrap();
        std::fs::write(workdir.join("train.log"), "hello").unwrap();
        std::fs::write(workdir.join("out/a.txt"), "a").unwrap();
        std::fs::write(workdir.join("out/nested/b.txt"), "b").unwrap();

        let task = sample_task(&workdir);
        let dest = tmp.join("T1_results.zip");
        build_archive(&task, &dest).unwrap();

        let file = std::fs::File::open(&dest).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "out/a.txt",
                "out/nested/b.txt",
                "slurm/T1.err",
                "slurm/T1.out",
                "slurm/T1.sh",
                "train.log",
            ]
        );
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn missing_paths_are_skipped_silently() {
        let tmp = tempdir();
        let workdir = tmp.join("proj2");
        std::fs::create_dir_all(&workdir).unwrap();
        let mut task = sample_task(&workdir);
        task.logs_paths = vec!["does/not/exist.log".into()];
        task.results_paths = vec![];

        let dest = tmp.join("T1_results2.zip");
        build_archive(&task, &dest).unwrap();
        let file = std::fs::File::open(&dest).unwrap();
        let archive = zip::ZipArchive::new(file).unwrap();
        assert_eq!(archive.len(), 0);
        std::fs::remove_dir_all(&tmp).ok();
    }

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("result-packager-test-{}", ulid_like()));
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    fn ulid_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }
}
