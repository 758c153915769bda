use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use stockledger_core::{ProductId, StoreId, TenantId, UserId};
use stockledger_infra::adjustments::{BatchAdjustmentRequest, BatchItem, BatchTarget};
use stockledger_infra::catalog::NullCatalog;
use stockledger_infra::config::LedgerSettings;
use stockledger_infra::ledger_store::InMemoryLedgerStore;
use stockledger_infra::reconciliation::Reconciler;
use stockledger_infra::stock::StockChange;
use stockledger_infra::transfers::{CreateTransfer, TransferLineRequest};
use stockledger_infra::StockLedger;
use stockledger_inventory::{AdjustmentType, EnteredQuantity};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn ledger() -> StockLedger<InMemoryLedgerStore> {
    StockLedger::new(
        InMemoryLedgerStore::new(),
        Arc::new(NullCatalog),
        LedgerSettings::default(),
    )
}

fn entry(tenant: TenantId, store: StoreId, product: ProductId, qty: i64) -> StockChange {
    StockChange {
        tenant_id: tenant,
        store_id: store,
        product_id: product,
        quantity: EnteredQuantity::base(qty),
        reason: "bench".to_string(),
        user_id: UserId::new(),
    }
}

/// Single entry posting on an existing balance.
fn bench_posting_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("posting_latency");
    group.sample_size(1000);

    let ledger = ledger();
    let (tenant, store, product) = (TenantId::new(), StoreId::new(), ProductId::new());
    rt.block_on(ledger.stock().add_stock(entry(tenant, store, product, 1)))
        .unwrap();

    group.bench_function("add_stock_existing_balance", |b| {
        b.iter(|| {
            rt.block_on(ledger.stock().add_stock(black_box(entry(tenant, store, product, 1))))
                .unwrap()
        })
    });

    group.finish();
}

/// Batch adjustments of increasing width, all lines in one transaction.
fn bench_batch_adjustment(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("batch_adjustment");

    for lines in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, &lines| {
            let ledger = ledger();
            let (tenant, store) = (TenantId::new(), StoreId::new());
            let products: Vec<ProductId> = (0..lines).map(|_| ProductId::new()).collect();
            b.iter(|| {
                let request = BatchAdjustmentRequest {
                    tenant_id: tenant,
                    store_id: store,
                    adjustment_type: AdjustmentType::InitialLoad,
                    reason: "bench".to_string(),
                    is_positive: true,
                    user_id: UserId::new(),
                    items: products
                        .iter()
                        .map(|p| BatchItem {
                            target: BatchTarget::Product(*p),
                            quantity: EnteredQuantity::base(1),
                        })
                        .collect(),
                };
                rt.block_on(ledger.adjustments().adjust_batch(black_box(request)))
                    .unwrap()
            })
        });
    }

    group.finish();
}

/// Full create+complete cycle of a one-line transfer.
fn bench_transfer_cycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("transfer_cycle");

    let ledger = ledger();
    let tenant = TenantId::new();
    let (from, to, product) = (StoreId::new(), StoreId::new(), ProductId::new());
    rt.block_on(ledger.stock().add_stock(entry(tenant, from, product, i64::MAX / 2)))
        .unwrap();

    group.bench_function("create_and_complete", |b| {
        b.iter(|| {
            rt.block_on(async {
                let created = ledger
                    .transfers()
                    .create(CreateTransfer {
                        tenant_id: tenant,
                        origin_store_id: from,
                        destination_store_id: to,
                        requested_by: UserId::new(),
                        notes: String::new(),
                        lines: vec![TransferLineRequest {
                            product_id: product,
                            quantity: EnteredQuantity::base(1),
                        }],
                    })
                    .await
                    .unwrap();
                ledger
                    .transfers()
                    .complete(tenant, created.id_typed(), UserId::new())
                    .await
                    .unwrap()
            })
        })
    });

    group.finish();
}

/// Replay cost of reconciliation as history grows.
fn bench_reconciliation(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("reconciliation");

    for movements in [10usize, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(movements),
            movements,
            |b, &movements| {
                let ledger = ledger();
                let (tenant, store, product) = (TenantId::new(), StoreId::new(), ProductId::new());
                let mut balance_id = None;
                for _ in 0..movements {
                    let posted = rt
                        .block_on(ledger.stock().add_stock(entry(tenant, store, product, 1)))
                        .unwrap();
                    balance_id = Some(posted.balance.id_typed());
                }
                let balance_id = balance_id.unwrap();
                let reconciler = Reconciler::new(ledger.store().clone());

                b.iter(|| {
                    rt.block_on(reconciler.reconcile_balance(tenant, black_box(balance_id)))
                        .unwrap()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_posting_latency,
    bench_batch_adjustment,
    bench_transfer_cycle,
    bench_reconciliation
);
criterion_main!(benches);
