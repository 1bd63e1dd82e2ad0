use crate::background_job::BackgroundJob;
use crate::errors::JobFailure;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Decodes a payload and runs the job it describes.
type RunTaskFn<Context> =
    Arc<dyn Fn(Context, Vec<u8>) -> BoxFuture<'static, Result<(), JobFailure>> + Send + Sync>;

/// Maps job type tags to the function that decodes and runs them.
pub(crate) struct JobRegistry<Context> {
    entries: HashMap<String, RunTaskFn<Context>>,
}

impl<Context> Default for JobRegistry<Context> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<Context> Clone for JobRegistry<Context> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<Context> fmt::Debug for JobRegistry<Context> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

impl<Context: Clone + Send + 'static> JobRegistry<Context> {
    /// Registers `J` under its `JOB_TYPE`, replacing any earlier registration.
    pub(crate) fn register<J: BackgroundJob<Context = Context>>(&mut self) {
        let run_task_fn: RunTaskFn<Context> = Arc::new(|ctx: Context, payload: Vec<u8>| {
            async move {
                let job = J::from_payload(&payload).map_err(JobFailure::Decode)?;
                job.run(ctx).await.map_err(JobFailure::Handler)
            }
            .boxed()
        });
        self.entries.insert(J::JOB_TYPE.to_string(), run_task_fn);
    }

    /// Decodes and runs a job. Unknown job types fail like any other attempt.
    pub(crate) fn run(
        &self,
        job_type: &str,
        ctx: Context,
        payload: Vec<u8>,
    ) -> BoxFuture<'static, Result<(), JobFailure>> {
        match self.entries.get(job_type) {
            Some(run_task_fn) => run_task_fn(ctx, payload),
            None => {
                let failure = JobFailure::UnknownJobType(job_type.to_string());
                async move { Err(failure) }.boxed()
            }
        }
    }
}

impl<Context> JobRegistry<Context> {
    pub(crate) fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
