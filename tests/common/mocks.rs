//! Mock version of a job store implementing every DAO contract.
use mockall::mock;

use spring_batch_repository::{
    BatchError,
    core::{
        context::ExecutionContext,
        job::{JobExecution, JobInstance},
        parameters::JobParameters,
        step::StepExecution,
    },
    repository::dao::{ExecutionContextDao, JobExecutionDao, JobInstanceDao, StepExecutionDao},
};

mock! {
    pub JobStore {}

    impl JobInstanceDao for JobStore {
        fn create_job_instance(
            &self,
            job_name: &str,
            job_parameters: &JobParameters,
        ) -> Result<JobInstance, BatchError>;
        fn get_job_instance(
            &self,
            job_name: &str,
            job_parameters: &JobParameters,
        ) -> Result<Option<JobInstance>, BatchError>;
        fn get_job_instance_by_id(&self, instance_id: i64) -> Result<Option<JobInstance>, BatchError>;
        fn get_job_names(&self) -> Result<Vec<String>, BatchError>;
        fn get_job_instances(
            &self,
            job_name: &str,
            start: usize,
            count: usize,
        ) -> Result<Vec<JobInstance>, BatchError>;
        fn get_last_job_instance(&self, job_name: &str) -> Result<Option<JobInstance>, BatchError>;
        fn get_job_instance_count(&self, job_name: &str) -> Result<usize, BatchError>;
        fn delete_job_instance(&self, job_instance: &JobInstance) -> Result<(), BatchError>;
    }

    impl JobExecutionDao for JobStore {
        fn save_job_execution(&self, job_execution: &mut JobExecution) -> Result<(), BatchError>;
        fn update_job_execution(&self, job_execution: &mut JobExecution) -> Result<(), BatchError>;
        fn find_job_executions(&self, job_instance: &JobInstance) -> Result<Vec<JobExecution>, BatchError>;
        fn get_last_job_execution(&self, job_instance: &JobInstance) -> Result<Option<JobExecution>, BatchError>;
        fn get_job_execution(&self, execution_id: i64) -> Result<Option<JobExecution>, BatchError>;
        fn find_running_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>, BatchError>;
        fn synchronize_status(&self, job_execution: &mut JobExecution) -> Result<(), BatchError>;
        fn delete_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError>;
        fn delete_job_execution_parameters(&self, job_execution: &JobExecution) -> Result<(), BatchError>;
    }

    impl StepExecutionDao for JobStore {
        fn save_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
        fn save_step_executions(&self, step_executions: &mut [StepExecution]) -> Result<(), BatchError>;
        fn update_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
        fn get_step_execution(
            &self,
            job_execution_id: i64,
            step_execution_id: i64,
        ) -> Result<Option<StepExecution>, BatchError>;
        fn get_step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecution>, BatchError>;
        fn delete_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError>;
    }

    impl ExecutionContextDao for JobStore {
        fn get_job_execution_context(&self, job_execution: &JobExecution) -> Result<ExecutionContext, BatchError>;
        fn get_step_execution_context(&self, step_execution: &StepExecution) -> Result<ExecutionContext, BatchError>;
        fn save_job_execution_context(&self, job_execution: &JobExecution) -> Result<(), BatchError>;
        fn save_step_execution_context(&self, step_execution: &StepExecution) -> Result<(), BatchError>;
        fn save_step_execution_contexts(&self, step_executions: &[StepExecution]) -> Result<(), BatchError>;
        fn update_job_execution_context(&self, job_execution: &JobExecution) -> Result<(), BatchError>;
        fn update_step_execution_context(&self, step_execution: &StepExecution) -> Result<(), BatchError>;
        fn delete_job_execution_context(&self, job_execution: &JobExecution) -> Result<(), BatchError>;
        fn delete_step_execution_context(&self, step_execution: &StepExecution) -> Result<(), BatchError>;
    }
}
