use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Asset classes tracked by the system
///
/// Four classes are keyed by ticker and carry a quantity/average-cost
/// position; three are keyed by a generated identifier and carry a running
/// value or balance instead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    BrStock,
    Fii,
    IntlStock,
    FiEtf,
    FixedIncome,
    RealAsset,
    CashAccount,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::BrStock => "br_stock",
            AssetClass::Fii => "fii",
            AssetClass::IntlStock => "intl_stock",
            AssetClass::FiEtf => "fi_etf",
            AssetClass::FixedIncome => "fixed_income",
            AssetClass::RealAsset => "real_asset",
            AssetClass::CashAccount => "cash_account",
        }
    }

    /// Classes identified by an exchange ticker (uppercase, <= 10 chars)
    pub fn is_ticker_keyed(&self) -> bool {
        matches!(
            self,
            AssetClass::BrStock | AssetClass::Fii | AssetClass::IntlStock | AssetClass::FiEtf
        )
    }

    /// Operations the ledger accepts for this class
    pub fn valid_operations(&self) -> &'static [OperationType] {
        use OperationType::*;
        match self {
            AssetClass::BrStock | AssetClass::Fii | AssetClass::IntlStock | AssetClass::FiEtf => {
                &[Compra, Venda, Transferencia, Desdobramento, Bonificacao]
            }
            AssetClass::FixedIncome | AssetClass::CashAccount => {
                &[Aporte, Resgate, Transferencia]
            }
            AssetClass::RealAsset => &[Compra, Venda],
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "br_stock" => Ok(AssetClass::BrStock),
            "fii" => Ok(AssetClass::Fii),
            "intl_stock" => Ok(AssetClass::IntlStock),
            "fi_etf" => Ok(AssetClass::FiEtf),
            "fixed_income" => Ok(AssetClass::FixedIncome),
            "real_asset" => Ok(AssetClass::RealAsset),
            "cash_account" => Ok(AssetClass::CashAccount),
            _ => Err(()),
        }
    }
}

/// Transaction operation types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Compra,
    Venda,
    Aporte,
    Resgate,
    Transferencia,
    Desdobramento,
    Bonificacao,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Compra => "compra",
            OperationType::Venda => "venda",
            OperationType::Aporte => "aporte",
            OperationType::Resgate => "resgate",
            OperationType::Transferencia => "transferencia",
            OperationType::Desdobramento => "desdobramento",
            OperationType::Bonificacao => "bonificacao",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compra" | "buy" | "c" => Ok(OperationType::Compra),
            "venda" | "sell" | "v" => Ok(OperationType::Venda),
            "aporte" => Ok(OperationType::Aporte),
            "resgate" => Ok(OperationType::Resgate),
            "transferencia" | "transferência" => Ok(OperationType::Transferencia),
            "desdobramento" => Ok(OperationType::Desdobramento),
            "bonificacao" | "bonificação" => Ok(OperationType::Bonificacao),
            _ => Err(()),
        }
    }
}

/// Ticker-keyed position: quantity plus weighted-average cost
///
/// Shared by br_stock, fii, intl_stock and fi_etf. For intl_stock the
/// avg_price/current_price fields are denominated in USD; the structure is
/// otherwise identical so the ledger math is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPosition {
    pub ticker: String,
    pub name: String,
    pub sector: Option<String>,
    pub qty: Decimal,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub broker: String,
}

impl EquityPosition {
    /// Empty position for a freshly auto-created asset
    pub fn new(ticker: &str, name: &str, sector: Option<String>, broker: &str) -> Self {
        EquityPosition {
            ticker: ticker.to_uppercase(),
            name: name.to_string(),
            sector,
            qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            current_price: Decimal::ZERO,
            broker: broker.to_string(),
        }
    }
}

/// Fixed-income instrument: tracked by applied (principal) and current value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedIncomePosition {
    pub id: String,
    pub title: String,
    pub kind: String, // CDB, CRA, CRI, DEB, LCA, LCI, LC, Tesouro, Outro
    pub rate_label: String,
    pub applied_value: Decimal,
    pub current_value: Decimal,
    pub application_date: NaiveDate,
    pub maturity_date: NaiveDate,
    pub broker: String,
    pub indexer: String,
    pub contracted_rate: Decimal,
    pub tax_exempt: bool,
}

/// Physical asset (real estate, vehicles, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealAssetPosition {
    pub id: String,
    pub description: String,
    pub kind: String,
    pub estimated_value: Decimal,
    pub acquisition_date: Option<NaiveDate>,
    pub include_in_total: bool,
}

/// Cash account (checking, savings, brokerage cash)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashAccountPosition {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub institution: String,
    pub balance: Decimal,
}

/// An asset position, dispatched by class
///
/// Closed variant type: every ledger operation pattern-matches exhaustively
/// on this enum, so adding a class forces every call site to be revisited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum Asset {
    BrStock(EquityPosition),
    Fii(EquityPosition),
    IntlStock(EquityPosition),
    FiEtf(EquityPosition),
    FixedIncome(FixedIncomePosition),
    RealAsset(RealAssetPosition),
    CashAccount(CashAccountPosition),
}

impl Asset {
    pub fn class(&self) -> AssetClass {
        match self {
            Asset::BrStock(_) => AssetClass::BrStock,
            Asset::Fii(_) => AssetClass::Fii,
            Asset::IntlStock(_) => AssetClass::IntlStock,
            Asset::FiEtf(_) => AssetClass::FiEtf,
            Asset::FixedIncome(_) => AssetClass::FixedIncome,
            Asset::RealAsset(_) => AssetClass::RealAsset,
            Asset::CashAccount(_) => AssetClass::CashAccount,
        }
    }

    /// Identity key: ticker for exchange-listed classes, generated id otherwise
    pub fn key(&self) -> &str {
        match self {
            Asset::BrStock(p) | Asset::Fii(p) | Asset::IntlStock(p) | Asset::FiEtf(p) => {
                &p.ticker
            }
            Asset::FixedIncome(p) => &p.id,
            Asset::RealAsset(p) => &p.id,
            Asset::CashAccount(p) => &p.id,
        }
    }

    /// Build a ticker-keyed asset of the given class
    ///
    /// Panics if called with an id-keyed class; callers dispatch on
    /// `is_ticker_keyed()` first.
    pub fn equity(class: AssetClass, position: EquityPosition) -> Asset {
        match class {
            AssetClass::BrStock => Asset::BrStock(position),
            AssetClass::Fii => Asset::Fii(position),
            AssetClass::IntlStock => Asset::IntlStock(position),
            AssetClass::FiEtf => Asset::FiEtf(position),
            _ => unreachable!("equity() called with id-keyed class {}", class),
        }
    }
}

/// Immutable ledger entry describing one portfolio event
///
/// References exactly one asset: `ticker` for ticker-keyed classes,
/// `asset_id` for id-keyed classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub operation: OperationType,
    pub asset_class: AssetClass,
    pub ticker: Option<String>,
    pub asset_id: Option<String>,
    pub asset_name: String,
    pub qty: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub total_value: Option<Decimal>,
    pub broker: String,
    pub broker_destination: Option<String>,
    pub fees: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Identity key of the referenced asset (uppercased ticker or raw id)
    pub fn asset_key(&self) -> Option<String> {
        if self.asset_class.is_ticker_keyed() {
            self.ticker.as_ref().map(|t| t.to_uppercase())
        } else {
            self.asset_id.clone()
        }
    }
}

/// Mutable transaction fields for edits
///
/// Enumerates the allowed columns explicitly; fields left as None keep
/// their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionUpdate {
    pub date: Option<NaiveDate>,
    pub operation: Option<OperationType>,
    pub asset_class: Option<AssetClass>,
    pub ticker: Option<String>,
    pub asset_id: Option<String>,
    pub asset_name: Option<String>,
    pub qty: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub total_value: Option<Decimal>,
    pub broker: Option<String>,
    pub broker_destination: Option<String>,
    pub fees: Option<Decimal>,
    pub notes: Option<String>,
}

/// Income record kinds (proventos and fixed-income cash events)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncomeKind {
    Dividendo,
    Jcp,
    Rendimento,
    Juros,
    Amortizacao,
}

impl IncomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncomeKind::Dividendo => "dividendo",
            IncomeKind::Jcp => "jcp",
            IncomeKind::Rendimento => "rendimento",
            IncomeKind::Juros => "juros",
            IncomeKind::Amortizacao => "amortizacao",
        }
    }
}

impl FromStr for IncomeKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dividendo" => Ok(IncomeKind::Dividendo),
            "jcp" => Ok(IncomeKind::Jcp),
            "rendimento" => Ok(IncomeKind::Rendimento),
            "juros" => Ok(IncomeKind::Juros),
            "amortizacao" | "amortização" => Ok(IncomeKind::Amortizacao),
            _ => Err(()),
        }
    }
}

/// Standalone income record (not a ledger transaction)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeRecord {
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub ticker: String, // ticker or bond code, truncated to 10 chars
    pub kind: IncomeKind,
    pub value: Decimal,
}
