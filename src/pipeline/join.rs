//! Four-way left join of the stacked datasets.
//!
//! Establishments are the driving side: every establishment row survives,
//! enriched with its company, simplified-tax-regime option and partners.
//! A company with several partners fans out into several rows.

use deltalake::datafusion::common::{Column, JoinType};
use deltalake::datafusion::dataframe::DataFrame;
use deltalake::datafusion::functions::expr_fn::concat;
use deltalake::datafusion::logical_expr::{Expr, ident, lit, when};
use deltalake::datafusion::scalar::ScalarValue;
use snafu::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{
    AmbiguousReferenceSnafu, JoinError, JoinPlanSnafu, ListReferenceSnafu, MissingReferenceSnafu,
    ReadDatasetSnafu,
};
use crate::layout::Layout;
use crate::naming::RecordCategory;
use crate::schema::KEY_COLUMN;

/// Derived full identifier column.
pub const FULL_ID_COLUMN: &str = "CNPJ_FULL";

const ORDER_COLUMN: &str = "CNPJ_ORDEM";
const CHECK_DIGIT_COLUMN: &str = "CNPJ_DV";

const LEFT: &str = "l";
const RIGHT: &str = "r";

/// Tag appended to a right-hand column whose name is already taken.
const COMPANY_TAG: &str = "EMPRESA";
const SIMPLES_TAG: &str = "SIMPLES";
const PARTNER_TAG: &str = "SOCIO";

/// Find the single curated support partition whose name contains `marker`.
pub fn locate_simples(dir: &Path, marker: &str) -> Result<PathBuf, JoinError> {
    let entries = std::fs::read_dir(dir).context(ListReferenceSnafu { dir })?;

    let mut matches = Vec::new();
    for entry in entries {
        let path = entry.context(ListReferenceSnafu { dir })?.path();
        let matched = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(marker));
        if matched {
            matches.push(path);
        }
    }
    matches.sort();

    match matches.len() {
        0 => MissingReferenceSnafu { marker, dir }.fail(),
        1 => Ok(matches.remove(0)),
        _ => AmbiguousReferenceSnafu {
            marker,
            matches: matches
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>(),
        }
        .fail(),
    }
}

/// Left join `right` onto `left` by the key column.
///
/// The right-hand key is dropped. A right-hand column whose name already
/// exists on the left is kept as `<COLUMN>_<tag>`.
fn left_join(left: DataFrame, right: DataFrame, tag: &str) -> Result<DataFrame, JoinError> {
    let left_names: Vec<String> = left
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let right_names: Vec<String> = right
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();

    let taken: HashSet<&str> = left_names.iter().map(String::as_str).collect();
    let mut projection: Vec<Expr> = left_names
        .iter()
        .map(|name| qualified(LEFT, name).alias(name))
        .collect();
    for name in right_names.iter().filter(|n| *n != KEY_COLUMN) {
        let output = if taken.contains(name.as_str()) {
            let renamed = format!("{name}_{tag}");
            debug!("Column {name} from {tag} kept as {renamed}");
            renamed
        } else {
            name.clone()
        };
        projection.push(qualified(RIGHT, name).alias(output));
    }

    let on = qualified(LEFT, KEY_COLUMN).eq(qualified(RIGHT, KEY_COLUMN));
    left.alias(LEFT)
        .context(JoinPlanSnafu { dataset: tag })?
        .join_on(
            right.alias(RIGHT).context(JoinPlanSnafu { dataset: tag })?,
            JoinType::Left,
            [on],
        )
        .context(JoinPlanSnafu { dataset: tag })?
        .select(projection)
        .context(JoinPlanSnafu { dataset: tag })
}

fn qualified(relation: &str, name: &str) -> Expr {
    Expr::Column(Column::new(Some(relation), name))
}

/// Join the four datasets and derive the full identifier.
pub fn join(
    establishments: DataFrame,
    companies: DataFrame,
    simples: DataFrame,
    partners: DataFrame,
) -> Result<DataFrame, JoinError> {
    let joined = left_join(establishments, companies, COMPANY_TAG)?;
    let joined = left_join(joined, simples, SIMPLES_TAG)?;
    let joined = left_join(joined, partners, PARTNER_TAG)?;

    let full_id = full_id().context(JoinPlanSnafu {
        dataset: FULL_ID_COLUMN,
    })?;
    joined
        .with_column(FULL_ID_COLUMN, full_id)
        .context(JoinPlanSnafu {
            dataset: FULL_ID_COLUMN,
        })
}

/// Basic number, order and check digit concatenated. Null when any of
/// them is null.
fn full_id() -> deltalake::datafusion::error::Result<Expr> {
    let fragments = vec![
        ident(KEY_COLUMN),
        ident(ORDER_COLUMN),
        ident(CHECK_DIGIT_COLUMN),
    ];
    let any_null = fragments
        .iter()
        .cloned()
        .map(Expr::is_null)
        .fold(lit(false), Expr::or);

    when(any_null, lit(ScalarValue::Utf8(None))).otherwise(concat(fragments))
}

/// Reads the join inputs from the sandbox and curated layers.
pub struct Joiner<'a> {
    engine: &'a Engine,
    layout: &'a Layout,
    simples_marker: &'a str,
}

impl<'a> Joiner<'a> {
    pub fn new(engine: &'a Engine, layout: &'a Layout, simples_marker: &'a str) -> Self {
        Self {
            engine,
            layout,
            simples_marker,
        }
    }

    async fn read(&self, path: &Path) -> Result<DataFrame, JoinError> {
        self.engine
            .read_parquet(path)
            .await
            .context(ReadDatasetSnafu {
                path: path.display().to_string(),
            })
    }

    /// Plan the join of the stacked datasets with the located simples
    /// partition. Nothing is executed until the result is consumed.
    pub async fn join_stacked(&self) -> Result<DataFrame, JoinError> {
        let simples_path = locate_simples(
            &self.layout.curated_dir(RecordCategory::Support),
            self.simples_marker,
        )?;
        info!("Using simples reference {}", simples_path.display());

        let establishments = self
            .read(&self.layout.stacked(RecordCategory::Establishment))
            .await?;
        let companies = self
            .read(&self.layout.stacked(RecordCategory::Company))
            .await?;
        let partners = self
            .read(&self.layout.stacked(RecordCategory::Partner))
            .await?;
        let simples = self.read(&simples_path).await?;

        join(establishments, companies, simples, partners)
    }
}
