use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_repair_requests_table::Migration),
            Box::new(m20240301_000002_create_blog_posts_table::Migration),
            Box::new(m20240815_000001_create_webhook_events_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_repair_requests_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_repair_requests_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create repair_requests table aligned with entities::repair_request Model
            manager
                .create_table(
                    Table::create()
                        .table(RepairRequests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RepairRequests::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::TicketNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::DeviceType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::IssueDescription)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::CommonIssues)
                                .json_binary()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::CustomerName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::CustomerEmail)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairRequests::CustomerPhone).string().null())
                        .col(
                            ColumnDef::new(RepairRequests::ShippingAddress)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::ShippingCity)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::ShippingState)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::ShippingZip)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairRequests::Status).text().not_null())
                        .col(
                            ColumnDef::new(RepairRequests::PaymentStatus)
                                .text()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairRequests::QuoteAmount).big_integer().null())
                        .col(
                            ColumnDef::new(RepairRequests::DepositAmount)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::AmountPaid)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::CheckoutSessionId)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::PaymentIntentId)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(RepairRequests::LabelUrl).string().null())
                        .col(ColumnDef::new(RepairRequests::TrackingNumber).string().null())
                        .col(ColumnDef::new(RepairRequests::TrackingUrl).string().null())
                        .col(
                            ColumnDef::new(RepairRequests::TrackingCarrier)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::Version)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Ticket numbers are the customer-facing identity; uniqueness is
            // the backstop behind the generate-and-retry loop.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_repair_requests_ticket_number")
                        .table(RepairRequests::Table)
                        .col(RepairRequests::TicketNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_repair_requests_status")
                        .table(RepairRequests::Table)
                        .col(RepairRequests::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_repair_requests_created_at")
                        .table(RepairRequests::Table)
                        .col(RepairRequests::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RepairRequests::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum RepairRequests {
        Table,
        Id,
        TicketNumber,
        DeviceType,
        IssueDescription,
        CommonIssues,
        CustomerName,
        CustomerEmail,
        CustomerPhone,
        ShippingAddress,
        ShippingCity,
        ShippingState,
        ShippingZip,
        Status,
        PaymentStatus,
        QuoteAmount,
        DepositAmount,
        AmountPaid,
        CheckoutSessionId,
        PaymentIntentId,
        LabelUrl,
        TrackingNumber,
        TrackingUrl,
        TrackingCarrier,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_blog_posts_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_blog_posts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create blog_posts table aligned with entities::blog_post Model
            manager
                .create_table(
                    Table::create()
                        .table(BlogPosts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(BlogPosts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(BlogPosts::Title).string().not_null())
                        .col(ColumnDef::new(BlogPosts::Slug).string().not_null())
                        .col(ColumnDef::new(BlogPosts::Content).text().not_null())
                        .col(ColumnDef::new(BlogPosts::Excerpt).text().null())
                        .col(
                            ColumnDef::new(BlogPosts::Published)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(BlogPosts::PublishedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(BlogPosts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BlogPosts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_blog_posts_slug")
                        .table(BlogPosts::Table)
                        .col(BlogPosts::Slug)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_blog_posts_published")
                        .table(BlogPosts::Table)
                        .col(BlogPosts::Published)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BlogPosts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum BlogPosts {
        Table,
        Id,
        Title,
        Slug,
        Content,
        Excerpt,
        Published,
        PublishedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240815_000001_create_webhook_events_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240815_000001_create_webhook_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Gateway event ids recorded before applying payment mutations,
            // so redelivered webhooks become no-ops.
            manager
                .create_table(
                    Table::create()
                        .table(WebhookEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WebhookEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WebhookEvents::EventId).string().not_null())
                        .col(ColumnDef::new(WebhookEvents::EventType).string().not_null())
                        .col(ColumnDef::new(WebhookEvents::TicketNumber).string().null())
                        .col(ColumnDef::new(WebhookEvents::Amount).big_integer().null())
                        .col(
                            ColumnDef::new(WebhookEvents::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_webhook_events_event_id")
                        .table(WebhookEvents::Table)
                        .col(WebhookEvents::EventId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WebhookEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum WebhookEvents {
        Table,
        Id,
        EventId,
        EventType,
        TicketNumber,
        Amount,
        ReceivedAt,
    }
}
