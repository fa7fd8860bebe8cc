pub mod instance_status;
pub mod job_instance_log;
pub mod monitor_action;
pub mod monitor_group_user;
