use sea_orm_migration::{
    prelude::*,
    schema::{
        big_integer_null, integer_null, pk_auto, small_integer, string, string_len,
        text_null, timestamp, timestamp_null,
    },
};

use crate::execution::truncate::limits;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobInstanceLog::Table)
                    .if_not_exists()
                    .col(pk_auto(JobInstanceLog::Id))
                    .col(
                        string_len(JobInstanceLog::FireInstanceId, limits::INSTANCE_ID as u32)
                            .unique_key(),
                    )
                    .col(string_len(JobInstanceLog::InstanceId, limits::INSTANCE_ID as u32))
                    .col(string_len(JobInstanceLog::ServerName, limits::SERVER_NAME as u32))
                    .col(string_len(JobInstanceLog::JobId, limits::JOB_ID as u32))
                    .col(string_len(JobInstanceLog::JobName, limits::JOB_NAME as u32))
                    .col(string_len(JobInstanceLog::JobGroup, limits::JOB_GROUP as u32))
                    .col(string_len(JobInstanceLog::JobType, limits::JOB_TYPE as u32))
                    .col(string_len(JobInstanceLog::TriggerId, limits::TRIGGER_ID as u32))
                    .col(string_len(JobInstanceLog::TriggerName, limits::TRIGGER_NAME as u32))
                    .col(string_len(JobInstanceLog::TriggerGroup, limits::TRIGGER_GROUP as u32))
                    .col(timestamp(JobInstanceLog::FireTime))
                    .col(timestamp_null(JobInstanceLog::ScheduledFireTime))
                    .col(timestamp(JobInstanceLog::StartDate))
                    .col(timestamp_null(JobInstanceLog::EndDate))
                    .col(big_integer_null(JobInstanceLog::DurationMs))
                    .col(string(JobInstanceLog::Status).default("running"))
                    .col(integer_null(JobInstanceLog::EffectedRows))
                    .col(small_integer(JobInstanceLog::Progress).default(0))
                    .col(text_null(JobInstanceLog::Information))
                    .col(text_null(JobInstanceLog::ExceptionText))
                    .col(text_null(JobInstanceLog::Data))
                    .to_owned(),
            )
            .await?;

        // Fail counting reads the most recent rows of one job
        manager
            .create_index(
                Index::create()
                    .name("idx-job_instance_log-job_id-start_date")
                    .table(JobInstanceLog::Table)
                    .col(JobInstanceLog::JobId)
                    .col(JobInstanceLog::StartDate)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobInstanceLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobInstanceLog {
    Table,
    Id,
    FireInstanceId,
    InstanceId,
    ServerName,
    JobId,
    JobName,
    JobGroup,
    JobType,
    TriggerId,
    TriggerName,
    TriggerGroup,
    FireTime,
    ScheduledFireTime,
    StartDate,
    EndDate,
    DurationMs,
    Status,
    EffectedRows,
    Progress,
    Information,
    ExceptionText,
    Data,
}
