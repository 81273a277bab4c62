//! Position ledger engine
//!
//! Pure state-transition logic: `apply` folds a transaction's effect into an
//! asset position, `revert` is its exact mathematical inverse. Neither does
//! any I/O; the `*_to_store` helpers resolve the target asset and persist the
//! mutation, treating a missing asset as a no-op (callers check existence
//! separately when they need to know).
//!
//! Average-cost and bonus-dilution formulas must read the pre-mutation
//! quantity and average, so both are captured into locals before any field
//! is overwritten.

use anyhow::Result;
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::db::{
    self, Asset, AssetClass, CashAccountPosition, EquityPosition, FixedIncomePosition,
    OperationType, RealAssetPosition, Transaction,
};
use crate::error::PortfolioError;

/// Reject operations that make no sense for the asset class
///
/// Surfaced synchronously as a failed write; never silently coerced.
pub fn validate_operation(class: AssetClass, operation: OperationType) -> Result<()> {
    if class.valid_operations().contains(&operation) {
        Ok(())
    } else {
        Err(PortfolioError::ValidationError(format!(
            "invalid operation '{}' for {}",
            operation, class
        ))
        .into())
    }
}

/// Apply a transaction's effect on the asset position, in place
pub fn apply(tx: &Transaction, asset: &mut Asset) {
    match asset {
        Asset::BrStock(p) | Asset::Fii(p) | Asset::IntlStock(p) | Asset::FiEtf(p) => {
            apply_equity(tx, p)
        }
        Asset::FixedIncome(p) => apply_fixed_income(tx, p),
        Asset::RealAsset(p) => apply_real_asset(tx, p),
        Asset::CashAccount(p) => apply_cash_account(tx, p),
    }
}

/// Revert a transaction's effect (inverse of `apply`)
pub fn revert(tx: &Transaction, asset: &mut Asset) {
    match asset {
        Asset::BrStock(p) | Asset::Fii(p) | Asset::IntlStock(p) | Asset::FiEtf(p) => {
            revert_equity(tx, p)
        }
        Asset::FixedIncome(p) => revert_fixed_income(tx, p),
        Asset::RealAsset(p) => revert_real_asset(tx, p),
        Asset::CashAccount(p) => revert_cash_account(tx, p),
    }
}

// ---------------------------------------------------------------------------
// Ticker-keyed classes: quantity + weighted-average cost
// ---------------------------------------------------------------------------

fn apply_equity(tx: &Transaction, p: &mut EquityPosition) {
    let tx_qty = tx.qty.unwrap_or(Decimal::ZERO);
    let tx_price = tx.unit_price.unwrap_or(Decimal::ZERO);

    match tx.operation {
        OperationType::Compra => {
            let old_qty = p.qty;
            let old_avg = p.avg_price;
            let new_qty = old_qty + tx_qty;
            if new_qty > Decimal::ZERO {
                p.avg_price = (old_qty * old_avg + tx_qty * tx_price) / new_qty;
            }
            p.qty = new_qty.trunc();
        }
        OperationType::Venda => {
            // Average cost intentionally untouched; realized gains are
            // recomputed from the transaction log, not the position.
            p.qty = (p.qty - tx_qty).trunc();
        }
        OperationType::Transferencia => {
            if let Some(dest) = tx.broker_destination.as_deref() {
                if !dest.is_empty() {
                    p.broker = dest.to_string();
                }
            }
        }
        OperationType::Desdobramento => {
            // tx.qty carries the split factor; factor <= 0 is rejected upstream
            let factor = tx.qty.unwrap_or(Decimal::ONE);
            p.qty = (p.qty * factor).trunc();
            if factor > Decimal::ZERO {
                p.avg_price /= factor;
            }
        }
        OperationType::Bonificacao => {
            let old_qty = p.qty;
            let old_avg = p.avg_price;
            let new_qty = old_qty + tx_qty;
            if new_qty > Decimal::ZERO {
                // Dilutes cost per share without changing total cost basis
                p.avg_price = old_qty * old_avg / new_qty;
            }
            p.qty = new_qty.trunc();
        }
        OperationType::Aporte | OperationType::Resgate => {}
    }
}

fn revert_equity(tx: &Transaction, p: &mut EquityPosition) {
    let tx_qty = tx.qty.unwrap_or(Decimal::ZERO);
    let tx_price = tx.unit_price.unwrap_or(Decimal::ZERO);

    match tx.operation {
        OperationType::Compra => {
            let cur_qty = p.qty;
            let cur_avg = p.avg_price;
            let old_qty = cur_qty - tx_qty;
            if old_qty > Decimal::ZERO {
                p.avg_price = (cur_qty * cur_avg - tx_qty * tx_price) / old_qty;
            } else if old_qty == Decimal::ZERO {
                p.avg_price = Decimal::ZERO;
            }
            p.qty = old_qty.max(Decimal::ZERO).trunc();
        }
        OperationType::Venda => {
            p.qty = (p.qty + tx_qty).trunc();
        }
        OperationType::Transferencia => {
            if !tx.broker.is_empty() {
                p.broker = tx.broker.clone();
            }
        }
        OperationType::Desdobramento => {
            let factor = tx.qty.unwrap_or(Decimal::ONE);
            if factor > Decimal::ZERO {
                p.qty = (p.qty / factor).trunc();
                p.avg_price *= factor;
            }
        }
        OperationType::Bonificacao => {
            let cur_qty = p.qty;
            let old_qty = cur_qty - tx_qty;
            if old_qty > Decimal::ZERO {
                p.avg_price = p.avg_price * cur_qty / old_qty;
            }
            p.qty = old_qty.max(Decimal::ZERO).trunc();
        }
        OperationType::Aporte | OperationType::Resgate => {}
    }
}

// ---------------------------------------------------------------------------
// Fixed income: applied (principal) value + current (marked) value
// ---------------------------------------------------------------------------

fn apply_fixed_income(tx: &Transaction, p: &mut FixedIncomePosition) {
    let total = tx.total_value.unwrap_or(Decimal::ZERO);
    match tx.operation {
        OperationType::Aporte => {
            p.applied_value += total;
            p.current_value += total;
        }
        OperationType::Resgate => {
            // applied_value stays as historical cost basis
            p.current_value -= total;
        }
        OperationType::Transferencia => {
            if let Some(dest) = tx.broker_destination.as_deref() {
                if !dest.is_empty() {
                    p.broker = dest.to_string();
                }
            }
        }
        _ => {}
    }
}

fn revert_fixed_income(tx: &Transaction, p: &mut FixedIncomePosition) {
    let total = tx.total_value.unwrap_or(Decimal::ZERO);
    match tx.operation {
        OperationType::Aporte => {
            p.applied_value -= total;
            p.current_value -= total;
        }
        OperationType::Resgate => {
            p.current_value += total;
        }
        OperationType::Transferencia => {
            if !tx.broker.is_empty() {
                p.broker = tx.broker.clone();
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Real assets and cash accounts
// ---------------------------------------------------------------------------

fn apply_real_asset(tx: &Transaction, p: &mut RealAssetPosition) {
    let total = tx.total_value.unwrap_or(Decimal::ZERO);
    match tx.operation {
        OperationType::Compra => p.estimated_value += total,
        OperationType::Venda => p.estimated_value -= total,
        _ => {}
    }
}

fn revert_real_asset(tx: &Transaction, p: &mut RealAssetPosition) {
    let total = tx.total_value.unwrap_or(Decimal::ZERO);
    match tx.operation {
        OperationType::Compra => p.estimated_value -= total,
        OperationType::Venda => p.estimated_value += total,
        _ => {}
    }
}

fn apply_cash_account(tx: &Transaction, p: &mut CashAccountPosition) {
    let total = tx.total_value.unwrap_or(Decimal::ZERO);
    match tx.operation {
        OperationType::Aporte => p.balance += total,
        OperationType::Resgate => p.balance -= total,
        OperationType::Transferencia => {
            if let Some(dest) = tx.broker_destination.as_deref() {
                if !dest.is_empty() {
                    p.institution = dest.to_string();
                }
            }
        }
        _ => {}
    }
}

fn revert_cash_account(tx: &Transaction, p: &mut CashAccountPosition) {
    let total = tx.total_value.unwrap_or(Decimal::ZERO);
    match tx.operation {
        OperationType::Aporte => p.balance -= total,
        OperationType::Resgate => p.balance += total,
        OperationType::Transferencia => {
            if !tx.broker.is_empty() {
                p.institution = tx.broker.clone();
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Store plumbing
// ---------------------------------------------------------------------------

/// Resolve the asset a transaction targets, None if the reference is
/// missing or the asset does not exist
pub fn resolve_asset(conn: &Connection, tx: &Transaction) -> Result<Option<Asset>> {
    match tx.asset_key() {
        Some(key) if !key.is_empty() => db::get_asset(conn, tx.asset_class, &key),
        _ => Ok(None),
    }
}

/// Apply a transaction against the stored asset; no-op when unresolved
pub fn apply_to_store(conn: &Connection, tx: &Transaction) -> Result<()> {
    if let Some(mut asset) = resolve_asset(conn, tx)? {
        apply(tx, &mut asset);
        db::update_asset(conn, &asset)?;
    }
    Ok(())
}

/// Revert a transaction against the stored asset; no-op when unresolved
pub fn revert_to_store(conn: &Connection, tx: &Transaction) -> Result<()> {
    if let Some(mut asset) = resolve_asset(conn, tx)? {
        revert(tx, &mut asset);
        db::update_asset(conn, &asset)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    fn tx(operation: OperationType, class: AssetClass) -> Transaction {
        Transaction {
            id: None,
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            operation,
            asset_class: class,
            ticker: Some("PETR4".to_string()),
            asset_id: None,
            asset_name: "PETR4".to_string(),
            qty: None,
            unit_price: None,
            total_value: None,
            broker: "XP".to_string(),
            broker_destination: None,
            fees: dec!(0),
            notes: None,
            created_at: Utc::now(),
        }
    }

    fn stock(qty: Decimal, avg: Decimal) -> Asset {
        Asset::BrStock(EquityPosition {
            ticker: "PETR4".to_string(),
            name: "Petrobras PN".to_string(),
            sector: None,
            qty,
            avg_price: avg,
            current_price: dec!(0),
            broker: "XP".to_string(),
        })
    }

    fn equity_fields(asset: &Asset) -> (Decimal, Decimal, String) {
        match asset {
            Asset::BrStock(p) => (p.qty, p.avg_price, p.broker.clone()),
            _ => panic!("not a stock"),
        }
    }

    fn assert_close(a: Decimal, b: Decimal) {
        assert!((a - b).abs() < dec!(0.000000001), "{} != {}", a, b);
    }

    #[test]
    fn test_validate_operation() {
        assert!(validate_operation(AssetClass::BrStock, OperationType::Compra).is_ok());
        assert!(validate_operation(AssetClass::BrStock, OperationType::Resgate).is_err());
        assert!(validate_operation(AssetClass::FixedIncome, OperationType::Aporte).is_ok());
        assert!(validate_operation(AssetClass::FixedIncome, OperationType::Desdobramento).is_err());
        assert!(validate_operation(AssetClass::RealAsset, OperationType::Transferencia).is_err());
        assert!(validate_operation(AssetClass::CashAccount, OperationType::Resgate).is_ok());
    }

    #[test]
    fn test_weighted_average_cost_on_buys() {
        let mut asset = stock(dec!(0), dec!(0));

        let mut buy = tx(OperationType::Compra, AssetClass::BrStock);
        buy.qty = Some(dec!(100));
        buy.unit_price = Some(dec!(10));
        apply(&buy, &mut asset);

        let (qty, avg, _) = equity_fields(&asset);
        assert_eq!(qty, dec!(100));
        assert_eq!(avg, dec!(10));

        let mut buy2 = tx(OperationType::Compra, AssetClass::BrStock);
        buy2.qty = Some(dec!(100));
        buy2.unit_price = Some(dec!(20));
        apply(&buy2, &mut asset);

        let (qty, avg, _) = equity_fields(&asset);
        assert_eq!(qty, dec!(200));
        assert_eq!(avg, dec!(15));
    }

    #[test]
    fn test_sell_leaves_average_unchanged() {
        let mut asset = stock(dec!(200), dec!(15));
        let mut sell = tx(OperationType::Venda, AssetClass::BrStock);
        sell.qty = Some(dec!(50));
        sell.unit_price = Some(dec!(30));
        apply(&sell, &mut asset);

        let (qty, avg, _) = equity_fields(&asset);
        assert_eq!(qty, dec!(150));
        assert_eq!(avg, dec!(15));
    }

    #[test]
    fn test_bonus_issue_dilutes_average() {
        let mut asset = stock(dec!(100), dec!(50));
        let mut bonus = tx(OperationType::Bonificacao, AssetClass::BrStock);
        bonus.qty = Some(dec!(10));
        apply(&bonus, &mut asset);

        let (qty, avg, _) = equity_fields(&asset);
        assert_eq!(qty, dec!(110));
        assert_close(avg, dec!(50) * dec!(100) / dec!(110));

        revert(&bonus, &mut asset);
        let (qty, avg, _) = equity_fields(&asset);
        assert_eq!(qty, dec!(100));
        assert_close(avg, dec!(50));
    }

    #[test]
    fn test_split_halves_average() {
        let mut asset = stock(dec!(100), dec!(20));
        let mut split = tx(OperationType::Desdobramento, AssetClass::BrStock);
        split.qty = Some(dec!(2));
        apply(&split, &mut asset);

        let (qty, avg, _) = equity_fields(&asset);
        assert_eq!(qty, dec!(200));
        assert_eq!(avg, dec!(10));

        revert(&split, &mut asset);
        let (qty, avg, _) = equity_fields(&asset);
        assert_eq!(qty, dec!(100));
        assert_eq!(avg, dec!(20));
    }

    #[test]
    fn test_transfer_moves_broker_only() {
        let mut asset = stock(dec!(100), dec!(20));
        let mut transfer = tx(OperationType::Transferencia, AssetClass::BrStock);
        transfer.broker = "XP".to_string();
        transfer.broker_destination = Some("Inter".to_string());

        apply(&transfer, &mut asset);
        let (qty, avg, broker) = equity_fields(&asset);
        assert_eq!((qty, avg), (dec!(100), dec!(20)));
        assert_eq!(broker, "Inter");

        revert(&transfer, &mut asset);
        let (_, _, broker) = equity_fields(&asset);
        assert_eq!(broker, "XP");
    }

    #[test]
    fn test_apply_revert_inverse_for_equity_ops() {
        let cases = [
            (OperationType::Compra, Some(dec!(37)), Some(dec!(21.47)), None),
            (OperationType::Venda, Some(dec!(40)), Some(dec!(25.00)), None),
            (OperationType::Desdobramento, Some(dec!(4)), None, None),
            (OperationType::Bonificacao, Some(dec!(13)), None, None),
            (
                OperationType::Transferencia,
                None,
                None,
                Some("Clear".to_string()),
            ),
        ];

        for (op, qty, price, dest) in cases {
            let original = stock(dec!(120), dec!(33.21));
            let mut asset = original.clone();

            let mut t = tx(op, AssetClass::BrStock);
            t.qty = qty;
            t.unit_price = price;
            t.broker_destination = dest;

            apply(&t, &mut asset);
            revert(&t, &mut asset);

            let (q0, a0, b0) = equity_fields(&original);
            let (q1, a1, b1) = equity_fields(&asset);
            assert_eq!(q0, q1, "qty mismatch for {}", op);
            assert_close(a0, a1);
            assert_eq!(b0, b1, "broker mismatch for {}", op);
        }
    }

    #[test]
    fn test_apply_revert_inverse_for_fixed_income() {
        let original = Asset::FixedIncome(FixedIncomePosition {
            id: "CDB123".to_string(),
            title: "CDB".to_string(),
            kind: "CDB".to_string(),
            rate_label: "CDI 100%".to_string(),
            applied_value: dec!(10000),
            current_value: dec!(10800),
            application_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            maturity_date: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
            broker: "Inter".to_string(),
            indexer: "CDI".to_string(),
            contracted_rate: dec!(1),
            tax_exempt: false,
        });

        for op in [OperationType::Aporte, OperationType::Resgate] {
            let mut asset = original.clone();
            let mut t = tx(op, AssetClass::FixedIncome);
            t.ticker = None;
            t.asset_id = Some("CDB123".to_string());
            t.total_value = Some(dec!(2500.75));

            apply(&t, &mut asset);
            revert(&t, &mut asset);
            assert_eq!(asset, original, "state not restored for {}", op);
        }
    }

    #[test]
    fn test_aporte_moves_both_values_resgate_only_current() {
        let mut asset = Asset::FixedIncome(FixedIncomePosition {
            id: "CDB123".to_string(),
            title: "CDB".to_string(),
            kind: "CDB".to_string(),
            rate_label: "CDI 100%".to_string(),
            applied_value: dec!(0),
            current_value: dec!(0),
            application_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            maturity_date: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
            broker: "Inter".to_string(),
            indexer: "CDI".to_string(),
            contracted_rate: dec!(1),
            tax_exempt: false,
        });

        let mut aporte = tx(OperationType::Aporte, AssetClass::FixedIncome);
        aporte.total_value = Some(dec!(1000));
        apply(&aporte, &mut asset);

        let mut resgate = tx(OperationType::Resgate, AssetClass::FixedIncome);
        resgate.total_value = Some(dec!(400));
        apply(&resgate, &mut asset);

        match &asset {
            Asset::FixedIncome(p) => {
                assert_eq!(p.applied_value, dec!(1000));
                assert_eq!(p.current_value, dec!(600));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_apply_revert_inverse_for_cash_and_real() {
        let cash = Asset::CashAccount(CashAccountPosition {
            id: "acc-1".to_string(),
            name: "Conta".to_string(),
            kind: "conta_corrente".to_string(),
            institution: "Inter".to_string(),
            balance: dec!(1234.56),
        });
        for op in [
            OperationType::Aporte,
            OperationType::Resgate,
            OperationType::Transferencia,
        ] {
            let mut asset = cash.clone();
            let mut t = tx(op, AssetClass::CashAccount);
            t.ticker = None;
            t.asset_id = Some("acc-1".to_string());
            t.total_value = Some(dec!(99.99));
            t.broker = "Inter".to_string();
            t.broker_destination = Some("Nubank".to_string());

            apply(&t, &mut asset);
            revert(&t, &mut asset);
            assert_eq!(asset, cash, "cash state not restored for {}", op);
        }

        let real = Asset::RealAsset(RealAssetPosition {
            id: "imovel-1".to_string(),
            description: "Apartamento".to_string(),
            kind: "Imovel".to_string(),
            estimated_value: dec!(450000),
            acquisition_date: None,
            include_in_total: true,
        });
        for op in [OperationType::Compra, OperationType::Venda] {
            let mut asset = real.clone();
            let mut t = tx(op, AssetClass::RealAsset);
            t.ticker = None;
            t.asset_id = Some("imovel-1".to_string());
            t.total_value = Some(dec!(50000));

            apply(&t, &mut asset);
            revert(&t, &mut asset);
            assert_eq!(asset, real, "real asset state not restored for {}", op);
        }
    }

    #[test]
    fn test_buy_into_empty_position_guards_division() {
        let mut asset = stock(dec!(0), dec!(0));
        let mut buy = tx(OperationType::Compra, AssetClass::BrStock);
        buy.qty = Some(dec!(0));
        buy.unit_price = Some(dec!(10));
        apply(&buy, &mut asset);

        let (qty, avg, _) = equity_fields(&asset);
        assert_eq!(qty, dec!(0));
        assert_eq!(avg, dec!(0));
    }

    #[test]
    fn test_store_apply_is_noop_for_missing_asset() {
        let conn = db::open_test_db();
        let mut buy = tx(OperationType::Compra, AssetClass::BrStock);
        buy.qty = Some(dec!(100));
        buy.unit_price = Some(dec!(10));

        // Asset does not exist: not an error, nothing happens
        apply_to_store(&conn, &buy).unwrap();
        assert!(db::get_asset(&conn, AssetClass::BrStock, "PETR4")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_store_apply_persists_mutation() {
        let conn = db::open_test_db();
        db::insert_asset(&conn, &stock(dec!(0), dec!(0))).unwrap();

        let mut buy = tx(OperationType::Compra, AssetClass::BrStock);
        buy.qty = Some(dec!(100));
        buy.unit_price = Some(dec!(38.50));
        apply_to_store(&conn, &buy).unwrap();

        let loaded = db::get_asset(&conn, AssetClass::BrStock, "PETR4")
            .unwrap()
            .unwrap();
        let (qty, avg, _) = equity_fields(&loaded);
        assert_eq!(qty, dec!(100));
        assert_eq!(avg, dec!(38.50));

        revert_to_store(&conn, &buy).unwrap();
        let loaded = db::get_asset(&conn, AssetClass::BrStock, "PETR4")
            .unwrap()
            .unwrap();
        let (qty, avg, _) = equity_fields(&loaded);
        assert_eq!(qty, dec!(0));
        assert_eq!(avg, dec!(0));
    }
}
