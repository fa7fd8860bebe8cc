use sea_orm_migration::{
    prelude::*,
    schema::{boolean, integer, integer_null, pk_auto, string, string_null},
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MonitorAction::Table)
                    .if_not_exists()
                    .col(pk_auto(MonitorAction::Id))
                    .col(string(MonitorAction::Title))
                    .col(integer(MonitorAction::Event))
                    .col(string(MonitorAction::Hook))
                    .col(string_null(MonitorAction::JobId))
                    .col(string_null(MonitorAction::JobGroup))
                    .col(integer_null(MonitorAction::GroupId))
                    .col(string_null(MonitorAction::EventArgument))
                    .col(boolean(MonitorAction::Active).default(true))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MonitorGroupUser::Table)
                    .if_not_exists()
                    .col(pk_auto(MonitorGroupUser::Id))
                    .col(integer(MonitorGroupUser::GroupId))
                    .col(string(MonitorGroupUser::Name))
                    .col(string(MonitorGroupUser::Email))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-monitor_group_user-group_id")
                    .table(MonitorGroupUser::Table)
                    .col(MonitorGroupUser::GroupId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MonitorGroupUser::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(MonitorAction::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MonitorAction {
    Table,
    Id,
    Title,
    Event,
    Hook,
    JobId,
    JobGroup,
    GroupId,
    EventArgument,
    Active,
}

#[derive(DeriveIden)]
enum MonitorGroupUser {
    Table,
    Id,
    GroupId,
    Name,
    Email,
}
