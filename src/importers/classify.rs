//! Shared classification and cell-parsing helpers for B3 statement files
//!
//! B3 spreadsheets identify assets only by ticker or by a free-form product
//! string, so the importers need heuristics to route each row to an asset
//! class and to a bond code. The rules here are ordered: the FI ETF list is
//! checked before the FII pattern because several listed fixed-income ETFs
//! match the four-letters-plus-11 shape.

use calamine::{Data, DataType};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::db::AssetClass;
use crate::error::{PortfolioError, Result};

/// Listed fixed-income ETFs; several collide with the FII ticker shape
static FI_ETF_TICKERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "LFTB11", "LFTS11", "NTNS11", "NTNB11", "IMAB11", "IRFM11", "B5P211", "IB5M11", "FIXA11",
        "KDIF11", "IDKA11",
    ])
});

/// Stock units ending in 11 that are not FIIs
static STOCK_UNITS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "BIDI11", "TAEE11", "KLBN11", "SANB11", "SAPR11", "ENBR11", "BPAC11", "ENGI11", "EGIE11",
        "ALUP11", "UNIT11", "RNEW11", "AESB11", "TIMS11",
    ])
});

static FII_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{4}1[1-3]B?$").expect("valid FII regex"));

static TICKER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{3,5}\d{1,2}F?$").expect("valid ticker regex"));

static NON_ALNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]").expect("valid sanitizer regex"));

pub const FRACTIONAL_MARKET: &str = "Mercado Fracionário";

pub const OPTION_MARKETS: &[&str] = &[
    "Opção de Compra sobre Ações",
    "Opção de Venda sobre Ações",
];

/// Fixed-income instrument prefixes in product strings
const RF_TYPES: &[&str] = &["CDB", "CRA", "CRI", "DEB", "LCA", "LCI", "LC"];

/// Institution name fragments mapped to short broker labels
///
/// Checked in order; the first fragment contained in the uppercased raw
/// name wins.
const BROKER_MAP: &[(&str, &str)] = &[
    ("BTG PACTUAL", "BTG Pactual"),
    ("XP INVESTIMENTOS", "XP"),
    ("CLEAR CORRETORA", "Clear"),
    ("RICO INVESTIMENTOS", "Rico"),
    ("INTER DISTRIBUIDORA", "Inter"),
    ("NU INVEST", "Nu Invest"),
    ("MODAL", "Modal"),
    ("GENIAL", "Genial"),
    ("ATIVA INVESTIMENTOS", "Ativa"),
    ("GUIDE INVESTIMENTOS", "Guide"),
    ("EASYNVEST", "Easynvest"),
    ("ORAMA", "Orama"),
    ("TERRA INVESTIMENTOS", "Terra"),
    ("MIRAE ASSET", "Mirae"),
    ("TORO INVESTIMENTOS", "Toro"),
    ("WARREN", "Warren"),
    ("BANCO DO BRASIL", "BB"),
    ("ITAU", "Itau"),
    ("BRADESCO", "Bradesco"),
    ("SANTANDER", "Santander"),
    ("CAIXA", "Caixa"),
    ("SAFRA", "Safra"),
    ("AGORA", "Agora"),
];

/// Classify an exchange ticker, returning the class and the cleaned ticker
///
/// In the fractional market tickers carry a trailing F that is stripped
/// before classification.
pub fn classify_ticker(ticker: &str, market: &str) -> (AssetClass, String) {
    let mut clean = ticker.trim().to_uppercase();

    if market == FRACTIONAL_MARKET && clean.ends_with('F') && clean.len() > 4 {
        clean.pop();
    }

    if FI_ETF_TICKERS.contains(clean.as_str()) {
        return (AssetClass::FiEtf, clean);
    }

    if FII_PATTERN.is_match(&clean) && !STOCK_UNITS.contains(clean.as_str()) {
        return (AssetClass::Fii, clean);
    }

    (AssetClass::BrStock, clean)
}

/// Shorten an institution name to a display label
pub fn abbreviate_broker(raw: &str) -> String {
    let upper = raw.to_uppercase();
    for (fragment, short) in BROKER_MAP {
        if upper.contains(fragment) {
            return (*short).to_string();
        }
    }
    let parts: Vec<&str> = raw.split_whitespace().collect();
    if parts.len() >= 2 {
        parts[..2].join(" ")
    } else {
        raw.to_string()
    }
}

/// Remove accents: Bonificação -> Bonificacao
pub fn strip_accents(s: &str) -> String {
    s.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Parse a date cell: native Excel dates, DD/MM/YYYY or ISO strings
pub fn parse_cell_date(cell: &Data) -> Result<NaiveDate> {
    if let Some(dt) = cell.as_datetime() {
        return Ok(dt.date());
    }

    let s = cell.to_string();
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%d/%m/%Y") {
        return Ok(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date);
    }

    Err(PortfolioError::ParseError(format!("cannot parse date '{}'", s)).into())
}

/// Parse a numeric cell; "-" and empty cells are None
///
/// String cells may use the Brazilian format (1.234,56) and carry a
/// currency prefix.
pub fn parse_cell_number(cell: &Data) -> Option<Decimal> {
    match cell {
        Data::Empty => None,
        Data::Int(i) => Some(Decimal::from(*i)),
        Data::Float(f) => Decimal::from_f64_retain(*f),
        Data::String(s) => parse_br_number(s),
        _ => None,
    }
}

fn parse_br_number(raw: &str) -> Option<Decimal> {
    let mut s = raw.replace("R$", "").trim().to_string();
    if s.is_empty() || s == "-" {
        return None;
    }
    if s.contains(',') {
        s = s.replace('.', "").replace(',', ".");
    }
    Decimal::from_str(&s).ok()
}

// ---------------------------------------------------------------------------
// Movement-statement categorization
// ---------------------------------------------------------------------------

/// Movement types that carry no position information
const SKIP_PATTERNS: &[&str] = &[
    "cancelado",
    "transferencia",
    "emprestimo",
    "reembolso",
    "incorporacao",
    "atualizacao",
    "transferido",
];

const SKIP_PREFIXES: &[&str] = &[
    "cessao de direitos",
    "direito",
    "solicitacao",
    "recibo",
    "fracao",
    "leilao",
];

/// Broad category of a movement row
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Provento,
    RendaFixa,
    Evento,
    Ignorado,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Provento => "provento",
            Category::RendaFixa => "renda_fixa",
            Category::Evento => "evento",
            Category::Ignorado => "ignorado",
        }
    }
}

/// How a movement row is materialized on confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Dividendo,
    Jcp,
    Rendimento,
    CompraRf,
    VencimentoRf,
    ResgateRf,
    JurosRf,
    AmortizacaoRf,
    Bonificacao,
    Desdobramento,
    Venda,
    Ignorado,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Dividendo => "dividendo",
            ImportKind::Jcp => "jcp",
            ImportKind::Rendimento => "rendimento",
            ImportKind::CompraRf => "compra_rf",
            ImportKind::VencimentoRf => "vencimento_rf",
            ImportKind::ResgateRf => "resgate_rf",
            ImportKind::JurosRf => "juros_rf",
            ImportKind::AmortizacaoRf => "amortizacao_rf",
            ImportKind::Bonificacao => "bonificacao",
            ImportKind::Desdobramento => "desdobramento",
            ImportKind::Venda => "venda",
            ImportKind::Ignorado => "ignorado",
        }
    }
}

/// Reason to skip a movement row, or None when it should be processed
pub fn should_skip(movement_type: &str, product: &str) -> Option<String> {
    let mt_norm = strip_accents(&movement_type.to_lowercase());
    let mt_norm = mt_norm.trim();
    let prod_norm = strip_accents(&product.to_lowercase());

    for pattern in SKIP_PATTERNS {
        if mt_norm.contains(pattern) {
            return Some(format!("Ignorado: {}", movement_type));
        }
    }

    for prefix in SKIP_PREFIXES {
        if mt_norm.starts_with(prefix) {
            return Some(format!("Ignorado: {}", movement_type));
        }
    }

    if prod_norm.contains("opcao") || mt_norm.contains("opcao") {
        return Some(format!("Opcao: {}", product));
    }

    None
}

/// Map a movement row to its category and import kind
pub fn categorize(direction: &str, movement_type: &str) -> (Category, ImportKind) {
    let mt_norm = strip_accents(&movement_type.to_lowercase());
    let mt_norm = mt_norm.trim();

    // Proventos match on prefix: B3 appends qualifiers like "- Transferido"
    let provento_map = [
        ("dividendo", ImportKind::Dividendo),
        ("juros sobre capital proprio", ImportKind::Jcp),
        ("rendimento", ImportKind::Rendimento),
    ];
    for (key, kind) in provento_map {
        if mt_norm == key || mt_norm.starts_with(key) {
            return (Category::Provento, kind);
        }
    }

    let rf_compra_types = [
        "compra / venda",
        "compra/venda",
        "compra/venda definitiva/cessao",
        "aplicacao",
    ];
    let dir_norm = strip_accents(&direction.to_lowercase());
    if rf_compra_types.contains(&mt_norm) && dir_norm.trim() == "credito" {
        return (Category::RendaFixa, ImportKind::CompraRf);
    }
    if mt_norm == "aplicacao" {
        return (Category::RendaFixa, ImportKind::CompraRf);
    }

    if mt_norm == "vencimento" {
        return (Category::RendaFixa, ImportKind::VencimentoRf);
    }
    if mt_norm == "resgate" || mt_norm == "resgate antecipado" {
        return (Category::RendaFixa, ImportKind::ResgateRf);
    }
    if mt_norm == "pagamento de juros" {
        return (Category::RendaFixa, ImportKind::JurosRf);
    }
    if mt_norm == "amortizacao" {
        return (Category::RendaFixa, ImportKind::AmortizacaoRf);
    }

    if mt_norm.contains("bonificacao") {
        return (Category::Evento, ImportKind::Bonificacao);
    }
    if mt_norm.contains("desdobro") {
        return (Category::Evento, ImportKind::Desdobramento);
    }
    if mt_norm == "venda" {
        return (Category::Evento, ImportKind::Venda);
    }

    (Category::Ignorado, ImportKind::Ignorado)
}

/// Asset identity extracted from a B3 product string
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductInfo {
    pub ticker: Option<String>,
    pub asset_name: String,
    pub asset_class: Option<AssetClass>,
    pub rf_type: Option<String>,
    pub rf_code: Option<String>,
}

/// Parse the product column of a movement statement
///
/// Shapes handled:
///   "ITSA4 - ITAUSA S/A"            ticker + name
///   "CDB - CDB8243X93D - QISTA"     bond type + code + issuer
///   "Tesouro Selic 2025"            government bond, code from the name
///   "PETR4"                         bare ticker
pub fn extract_product_info(product: &str) -> ProductInfo {
    let product = product.trim();
    let mut info = ProductInfo {
        asset_name: product.to_string(),
        ..Default::default()
    };

    if product.is_empty() {
        return info;
    }

    if product.to_lowercase().starts_with("tesouro") {
        info.rf_type = Some("Tesouro".to_string());
        info.asset_class = Some(AssetClass::FixedIncome);
        info.rf_code = Some(truncate(&NON_ALNUM.replace_all(product, ""), 36));
        return info;
    }

    let parts: Vec<&str> = product.splitn(3, " - ").map(str::trim).collect();

    // Fixed income: TYPE - CODE - NAME or TYPE - CODE
    if parts.len() >= 2 && RF_TYPES.contains(&parts[0].to_uppercase().as_str()) {
        info.rf_type = Some(parts[0].to_uppercase());
        info.rf_code = Some(truncate(parts[1], 36));
        info.asset_class = Some(AssetClass::FixedIncome);
        info.asset_name = if parts.len() >= 3 { parts[2] } else { parts[1] }.to_string();
        return info;
    }

    // Stock/FII: TICKER - NAME
    if parts.len() >= 2 {
        let candidate = parts[0].to_uppercase();
        if TICKER_PATTERN.is_match(&candidate) {
            let (class, clean) = classify_ticker(&candidate, "");
            info.ticker = Some(clean);
            info.asset_name = parts[1].to_string();
            info.asset_class = Some(class);
            return info;
        }
    }

    // Bare ticker with no separator
    let candidate = parts[0].to_uppercase();
    if TICKER_PATTERN.is_match(&candidate) {
        let (class, clean) = classify_ticker(&candidate, "");
        info.ticker = Some(clean);
        info.asset_class = Some(class);
        return info;
    }

    info
}

/// Truncate to at most `max` characters, multibyte safe
pub fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_ticker_fractional_market() {
        assert_eq!(
            classify_ticker("PETR4F", FRACTIONAL_MARKET),
            (AssetClass::BrStock, "PETR4".to_string())
        );
        // Outside the fractional market the F is part of the ticker
        assert_eq!(
            classify_ticker("PETR4F", "Mercado a Vista"),
            (AssetClass::BrStock, "PETR4F".to_string())
        );
    }

    #[test]
    fn test_classify_ticker_fii_pattern() {
        assert_eq!(
            classify_ticker("HGLG11", ""),
            (AssetClass::Fii, "HGLG11".to_string())
        );
        assert_eq!(
            classify_ticker("MXRF11", ""),
            (AssetClass::Fii, "MXRF11".to_string())
        );
        // 12 and 13 suffixes, subscription receipts
        assert_eq!(classify_ticker("HGLG12", "").0, AssetClass::Fii);
        assert_eq!(classify_ticker("HGLG13", "").0, AssetClass::Fii);
        assert_eq!(classify_ticker("CPTS11B", "").0, AssetClass::Fii);
    }

    #[test]
    fn test_classify_ticker_stock_units_not_fii() {
        assert_eq!(
            classify_ticker("TAEE11", ""),
            (AssetClass::BrStock, "TAEE11".to_string())
        );
        assert_eq!(classify_ticker("KLBN11", "").0, AssetClass::BrStock);
    }

    #[test]
    fn test_classify_ticker_fi_etf_wins_over_fii() {
        assert_eq!(
            classify_ticker("LFTS11", ""),
            (AssetClass::FiEtf, "LFTS11".to_string())
        );
        assert_eq!(classify_ticker("IMAB11", "").0, AssetClass::FiEtf);
    }

    #[test]
    fn test_classify_ticker_plain_stock() {
        assert_eq!(
            classify_ticker("petr4", ""),
            (AssetClass::BrStock, "PETR4".to_string())
        );
        assert_eq!(classify_ticker("VALE3", "").0, AssetClass::BrStock);
    }

    #[test]
    fn test_abbreviate_broker() {
        assert_eq!(
            abbreviate_broker("XP INVESTIMENTOS CCTVM S/A"),
            "XP".to_string()
        );
        assert_eq!(
            abbreviate_broker("BTG PACTUAL CTVM S.A."),
            "BTG Pactual".to_string()
        );
        assert_eq!(
            abbreviate_broker("ITAU CORRETORA DE VALORES S/A"),
            "Itau".to_string()
        );
        // Unknown broker: first two words
        assert_eq!(
            abbreviate_broker("CORRETORA NOVA DO BRASIL LTDA"),
            "CORRETORA NOVA".to_string()
        );
        assert_eq!(abbreviate_broker("SINGLEWORD"), "SINGLEWORD".to_string());
    }

    #[test]
    fn test_strip_accents() {
        assert_eq!(strip_accents("Bonificação"), "Bonificacao");
        assert_eq!(strip_accents("Transferência - Liquidação"), "Transferencia - Liquidacao");
        assert_eq!(strip_accents("plain"), "plain");
    }

    #[test]
    fn test_parse_cell_date() {
        assert_eq!(
            parse_cell_date(&Data::String("15/01/2026".to_string())).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
        );
        assert_eq!(
            parse_cell_date(&Data::String("2026-01-15".to_string())).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
        );
        assert!(parse_cell_date(&Data::String("not a date".to_string())).is_err());
    }

    #[test]
    fn test_parse_cell_number() {
        use rust_decimal_macros::dec;

        assert_eq!(
            parse_cell_number(&Data::String("1.234,56".to_string())),
            Some(dec!(1234.56))
        );
        assert_eq!(
            parse_cell_number(&Data::String("R$ 10,50".to_string())),
            Some(dec!(10.50))
        );
        assert_eq!(parse_cell_number(&Data::String("-".to_string())), None);
        assert_eq!(parse_cell_number(&Data::String("0".to_string())), Some(dec!(0)));
        assert_eq!(parse_cell_number(&Data::Int(42)), Some(dec!(42)));
        assert_eq!(parse_cell_number(&Data::Empty), None);
    }

    #[test]
    fn test_should_skip() {
        assert!(should_skip("Transferência - Liquidação", "PETR4 - PETROBRAS").is_some());
        assert!(should_skip("Empréstimo", "VALE3 - VALE").is_some());
        assert!(should_skip("Direitos de Subscrição - Não Exercido", "X").is_some());
        assert!(should_skip("Compra / Venda", "Opção de Compra PETRF407").is_some());
        assert!(should_skip("Dividendo", "PETR4 - PETROBRAS").is_none());
        assert!(should_skip("Vencimento", "CDB - CDB123 - BANCO").is_none());
    }

    #[test]
    fn test_categorize_proventos() {
        assert_eq!(
            categorize("Credito", "Dividendo"),
            (Category::Provento, ImportKind::Dividendo)
        );
        assert_eq!(
            categorize("Credito", "Juros Sobre Capital Próprio"),
            (Category::Provento, ImportKind::Jcp)
        );
        assert_eq!(
            categorize("Credito", "Rendimento"),
            (Category::Provento, ImportKind::Rendimento)
        );
    }

    #[test]
    fn test_categorize_renda_fixa() {
        assert_eq!(
            categorize("Credito", "COMPRA / VENDA"),
            (Category::RendaFixa, ImportKind::CompraRf)
        );
        // Debit side of a trade pair is not a purchase
        assert_eq!(
            categorize("Debito", "COMPRA / VENDA"),
            (Category::Ignorado, ImportKind::Ignorado)
        );
        assert_eq!(
            categorize("Credito", "Aplicação"),
            (Category::RendaFixa, ImportKind::CompraRf)
        );
        assert_eq!(
            categorize("Credito", "Vencimento"),
            (Category::RendaFixa, ImportKind::VencimentoRf)
        );
        assert_eq!(
            categorize("Credito", "Resgate Antecipado"),
            (Category::RendaFixa, ImportKind::ResgateRf)
        );
        assert_eq!(
            categorize("Credito", "Pagamento de Juros"),
            (Category::RendaFixa, ImportKind::JurosRf)
        );
        assert_eq!(
            categorize("Credito", "Amortização"),
            (Category::RendaFixa, ImportKind::AmortizacaoRf)
        );
    }

    #[test]
    fn test_categorize_eventos() {
        assert_eq!(
            categorize("Credito", "Bonificação em Ativos"),
            (Category::Evento, ImportKind::Bonificacao)
        );
        assert_eq!(
            categorize("Credito", "Desdobro"),
            (Category::Evento, ImportKind::Desdobramento)
        );
        assert_eq!(
            categorize("Debito", "Venda"),
            (Category::Evento, ImportKind::Venda)
        );
        assert_eq!(categorize("Credito", "Algo Estranho").0, Category::Ignorado);
    }

    #[test]
    fn test_extract_product_info_ticker() {
        let info = extract_product_info("ITSA4 - ITAUSA S/A");
        assert_eq!(info.ticker.as_deref(), Some("ITSA4"));
        assert_eq!(info.asset_name, "ITAUSA S/A");
        assert_eq!(info.asset_class, Some(AssetClass::BrStock));

        let info = extract_product_info("HGLG11 - CSHG LOGISTICA FII");
        assert_eq!(info.ticker.as_deref(), Some("HGLG11"));
        assert_eq!(info.asset_class, Some(AssetClass::Fii));
    }

    #[test]
    fn test_extract_product_info_fixed_income() {
        let info = extract_product_info("CDB - CDB8243X93D - QISTA S.A.");
        assert_eq!(info.rf_type.as_deref(), Some("CDB"));
        assert_eq!(info.rf_code.as_deref(), Some("CDB8243X93D"));
        assert_eq!(info.asset_class, Some(AssetClass::FixedIncome));
        assert_eq!(info.asset_name, "QISTA S.A.");

        let info = extract_product_info("DEB - NTEN11 - NORTE ENERGIA");
        assert_eq!(info.rf_type.as_deref(), Some("DEB"));
        assert_eq!(info.rf_code.as_deref(), Some("NTEN11"));
    }

    #[test]
    fn test_extract_product_info_tesouro() {
        let info = extract_product_info("Tesouro Selic 2025");
        assert_eq!(info.rf_type.as_deref(), Some("Tesouro"));
        assert_eq!(info.rf_code.as_deref(), Some("TesouroSelic2025"));
        assert_eq!(info.asset_class, Some(AssetClass::FixedIncome));
        assert_eq!(info.asset_name, "Tesouro Selic 2025");
    }

    #[test]
    fn test_extract_product_info_bare_ticker() {
        let info = extract_product_info("PETR4");
        assert_eq!(info.ticker.as_deref(), Some("PETR4"));
        assert_eq!(info.asset_name, "PETR4");
    }

    #[test]
    fn test_extract_product_info_unrecognized() {
        let info = extract_product_info("SOMETHING COMPLETELY DIFFERENT");
        assert_eq!(info.ticker, None);
        assert_eq!(info.rf_code, None);
        assert_eq!(info.asset_class, None);
        assert_eq!(info.asset_name, "SOMETHING COMPLETELY DIFFERENT");
    }
}
