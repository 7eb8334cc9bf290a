use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_catalog_tables::Migration),
            Box::new(m20240601_000002_create_carts_table::Migration),
            Box::new(m20240601_000003_create_orders_tables::Migration),
            Box::new(m20240601_000004_create_payment_ledger_table::Migration),
        ]
    }
}

mod m20240601_000001_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Category).string().not_null())
                        .col(ColumnDef::new(Products::Price).decimal().not_null())
                        .col(
                            ColumnDef::new(Products::Stock)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Products::Stock).gte(0)),
                        )
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductVariants::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::ProductId).uuid().not_null())
                        .col(ColumnDef::new(ProductVariants::Name).string().not_null())
                        .col(ColumnDef::new(ProductVariants::Price).decimal().null())
                        .col(
                            ColumnDef::new(ProductVariants::Stock)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(ProductVariants::Stock).gte(0)),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_variants_product_id")
                                .from(ProductVariants::Table, ProductVariants::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_variants_product_id")
                        .table(ProductVariants::Table)
                        .col(ProductVariants::ProductId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Coupons::CouponCode).string().not_null())
                        .col(ColumnDef::new(Coupons::PromoType).string().not_null())
                        .col(
                            ColumnDef::new(Coupons::DiscountValue)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Coupons::UsageLimit).integer().null())
                        .col(ColumnDef::new(Coupons::PerUserLimit).integer().null())
                        .col(
                            ColumnDef::new(Coupons::CurrentUsage)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::MinimumOrderValue)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Coupons::ApplicableCategories).json().not_null())
                        .col(ColumnDef::new(Coupons::ApplicableProducts).json().not_null())
                        .col(
                            ColumnDef::new(Coupons::StartDateTime)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::EndDateTime)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
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
                        .name("idx_coupons_coupon_code")
                        .table(Coupons::Table)
                        .col(Coupons::CouponCode)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        Category,
        Price,
        Stock,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ProductVariants {
        Table,
        Id,
        ProductId,
        Name,
        Price,
        Stock,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        CouponCode,
        PromoType,
        DiscountValue,
        UsageLimit,
        PerUserLimit,
        CurrentUsage,
        MinimumOrderValue,
        ApplicableCategories,
        ApplicableProducts,
        StartDateTime,
        EndDateTime,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_carts_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_carts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let money = |col: Carts| {
                ColumnDef::new(col)
                    .decimal()
                    .not_null()
                    .default(0)
                    .to_owned()
            };

            manager
                .create_table(
                    Table::create()
                        .table(Carts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Carts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Carts::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(Carts::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Carts::ActiveUserId).uuid().null())
                        .col(ColumnDef::new(Carts::Items).json().not_null())
                        .col(ColumnDef::new(Carts::AppliedCoupons).json().not_null())
                        .col(money(Carts::Subtotal))
                        .col(money(Carts::Discount))
                        .col(money(Carts::DeliveryFee))
                        .col(money(Carts::ServiceCharge))
                        .col(money(Carts::TotalAmount))
                        .col(
                            ColumnDef::new(Carts::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Carts::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Carts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Carts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One active cart per user: NULLs (inactive carts) never collide.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_carts_active_user_id")
                        .table(Carts::Table)
                        .col(Carts::ActiveUserId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_carts_user_id")
                        .table(Carts::Table)
                        .col(Carts::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum Carts {
        Table,
        Id,
        UserId,
        IsActive,
        ActiveUserId,
        Items,
        AppliedCoupons,
        Subtotal,
        Discount,
        DeliveryFee,
        ServiceCharge,
        TotalAmount,
        Version,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_orders_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let money = |col: Orders| {
                ColumnDef::new(col)
                    .decimal()
                    .not_null()
                    .default(0)
                    .to_owned()
            };
            let optional_ts = |col: Orders| {
                ColumnDef::new(col)
                    .timestamp_with_time_zone()
                    .null()
                    .to_owned()
            };

            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::OrderSlug).string().not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Items).json().not_null())
                        .col(ColumnDef::new(Orders::ShippingAddressId).uuid().not_null())
                        .col(ColumnDef::new(Orders::DeliveryMethod).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::OrderStatus).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string_len(24).not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::PaymentReference).string().null())
                        .col(ColumnDef::new(Orders::TransactionId).string().null())
                        .col(money(Orders::PaymentAmount))
                        .col(optional_ts(Orders::PaidAt))
                        .col(ColumnDef::new(Orders::RefundAmount).decimal().null())
                        .col(optional_ts(Orders::RefundedAt))
                        .col(money(Orders::Subtotal))
                        .col(money(Orders::DeliveryFee))
                        .col(money(Orders::ServiceCharge))
                        .col(money(Orders::Tax))
                        .col(money(Orders::Discount))
                        .col(money(Orders::TotalAmount))
                        .col(ColumnDef::new(Orders::AppliedCoupons).json().not_null())
                        .col(ColumnDef::new(Orders::StatusHistory).json().not_null())
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(ColumnDef::new(Orders::TrackingNumber).string().null())
                        .col(optional_ts(Orders::EstimatedDelivery))
                        .col(optional_ts(Orders::ActualDelivery))
                        .col(ColumnDef::new(Orders::CancellationReason).text().null())
                        .col(optional_ts(Orders::CancelledAt))
                        .col(ColumnDef::new(Orders::ReturnReason).text().null())
                        .col(optional_ts(Orders::ReturnRequestedAt))
                        .col(ColumnDef::new(Orders::Rating).integer().null())
                        .col(ColumnDef::new(Orders::Review).text().null())
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            for (name, col, unique) in [
                ("idx_orders_order_number", Orders::OrderNumber, true),
                ("idx_orders_order_slug", Orders::OrderSlug, true),
                ("idx_orders_user_id", Orders::UserId, false),
                ("idx_orders_payment_reference", Orders::PaymentReference, false),
            ] {
                let mut index = Index::create();
                index.if_not_exists().name(name).table(Orders::Table).col(col);
                if unique {
                    index.unique();
                }
                manager.create_index(index.to_owned()).await?;
            }

            manager
                .create_table(
                    Table::create()
                        .table(OrderCoupons::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderCoupons::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderCoupons::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderCoupons::UserId).uuid().not_null())
                        .col(ColumnDef::new(OrderCoupons::CouponCode).string().not_null())
                        .col(
                            ColumnDef::new(OrderCoupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_coupons_order_id")
                                .from(OrderCoupons::Table, OrderCoupons::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_coupons_order_code")
                        .table(OrderCoupons::Table)
                        .col(OrderCoupons::OrderId)
                        .col(OrderCoupons::CouponCode)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_coupons_user_code")
                        .table(OrderCoupons::Table)
                        .col(OrderCoupons::UserId)
                        .col(OrderCoupons::CouponCode)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderCoupons::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        OrderSlug,
        UserId,
        Items,
        ShippingAddressId,
        DeliveryMethod,
        OrderStatus,
        PaymentMethod,
        PaymentStatus,
        PaymentReference,
        TransactionId,
        PaymentAmount,
        PaidAt,
        RefundAmount,
        RefundedAt,
        Subtotal,
        DeliveryFee,
        ServiceCharge,
        Tax,
        Discount,
        TotalAmount,
        AppliedCoupons,
        StatusHistory,
        Notes,
        TrackingNumber,
        EstimatedDelivery,
        ActualDelivery,
        CancellationReason,
        CancelledAt,
        ReturnReason,
        ReturnRequestedAt,
        Rating,
        Review,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderCoupons {
        Table,
        Id,
        OrderId,
        UserId,
        CouponCode,
        CreatedAt,
    }
}

mod m20240601_000004_create_payment_ledger_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_payment_ledger_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentLedger::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentLedger::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentLedger::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(PaymentLedger::Amount)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentLedger::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(PaymentLedger::TransactionRef).string().not_null())
                        .col(ColumnDef::new(PaymentLedger::PaymentChannel).string().not_null())
                        .col(
                            ColumnDef::new(PaymentLedger::PaymentStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentLedger::Meta).json().not_null())
                        .col(
                            ColumnDef::new(PaymentLedger::ProviderTransactionId)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(PaymentLedger::FailureReason).text().null())
                        .col(
                            ColumnDef::new(PaymentLedger::ConfirmedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentLedger::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentLedger::UpdatedAt)
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
                        .name("idx_payment_ledger_transaction_ref")
                        .table(PaymentLedger::Table)
                        .col(PaymentLedger::TransactionRef)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_ledger_user_id")
                        .table(PaymentLedger::Table)
                        .col(PaymentLedger::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentLedger::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentLedger {
        Table,
        Id,
        UserId,
        Amount,
        Currency,
        TransactionRef,
        PaymentChannel,
        PaymentStatus,
        Meta,
        ProviderTransactionId,
        FailureReason,
        ConfirmedAt,
        CreatedAt,
        UpdatedAt,
    }
}
