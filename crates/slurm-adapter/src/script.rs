use broker_core::Task;

/// Parameters needed to render a batch script, decoupled from the full
/// `Task` type so tests can construct one without a store round trip.
pub struct ScriptParams<'a> {
    pub task_id: &'a str,
    pub username: &'a str,
    pub workdir: &'a str,
    pub commands: &'a [String],
    pub gpus: u32,
    pub cpus: u32,
    pub memory: &'a str,
    pub time_limit: &'a str,
    pub partition: Option<&'a str>,
    pub out_path: &'a str,
    pub err_path: &'a str,
}

impl<'a> ScriptParams<'a> {
    pub fn from_task(task: &'a Task, out_path: &'a str, err_path: &'a str) -> Self {
        ScriptParams {
            task_id: &task.task_id,
            username: &task.username,
            workdir: &task.workdir,
            commands: &task.commands,
            gpus: task.gpus,
            cpus: task.cpus,
            memory: &task.memory,
            time_limit: &task.time_limit,
            partition: task.partition.as_deref(),
            out_path,
            err_path,
        }
    }
}

/// Render the batch script bytes Slurm will read (spec.md §4.2).
/// Deterministic: identical `ScriptParams` always produce byte-identical
/// output, which is what makes `sbatch` idempotent to retry at the
/// script level (the actual submission itself is still one-shot).
pub fn render_batch_script(p: &ScriptParams) -> String {
    let mut s = String::new();
    s.push_str("#!/bin/bash\n");
    s.push_str(&format!("#SBATCH --job-name={}\n", p.task_id));
    s.push_str(&format!("#SBATCH --output={}\n", p.out_path));
    s.push_str(&format!("#SBATCH --error={}\n", p.err_path));
    s.push_str(&format!("#SBATCH --time={}\n", p.time_limit));
    s.push_str(&format!("#SBATCH --cpus-per-task={}\n", p.cpus));
    s.push_str(&format!("#SBATCH --mem={}\n", p.memory));
    if p.gpus > 0 {
        s.push_str(&format!("#SBATCH --gres=gpu:{}\n", p.gpus));
    }
    if let Some(partition) = p.partition {
        s.push_str(&format!("#SBATCH --partition={}\n", partition));
    }
    s.push('\n');
    s.push_str(&format!("echo \"task {} started by {} at $(date -Iseconds)\"\n", p.task_id, p.username));
    s.push_str(&format!("echo \"workdir: {}\"\n", p.workdir));
    s.push_str(&format!("cd {}\n", p.workdir));
    s.push('\n');
    for line in p.commands {
        s.push_str(line);
        s.push('\n');
    }
    s.push('\n');
    s.push_str("__rc=$?\n");
    s.push_str(&format!("echo \"task {} ended at $(date -Iseconds), exit $__rc\"\n", p.task_id));
    s.push_str("exit $__rc\n");
    s
}
