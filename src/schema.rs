//! Column mappings for the registry's file types.
//!
//! Raw files carry no header row, so each file-type suffix maps to the
//! ordered column names applied positionally on conversion.

use deltalake::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::SchemaOverrides;

/// Suffix whose mapping doubles as the generic fallback.
pub const GENERIC_SUFFIX: &str = "SIMPLES";

/// Shared base identifier of every dataset.
pub const KEY_COLUMN: &str = "CNPJ_BASICO";

const COMPANY: &[&str] = &[
    "CNPJ_BASICO",
    "RAZAO_SOCIAL",
    "NATUREZA_JURIDICA",
    "QUALIFICACAO_RESPONSAVEL",
    "CAPITAL_SOCIAL",
    "PORTE_EMPRESA",
    "ENTE_FEDERATIVO_RESPONSAVEL",
];

const ESTABLISHMENT: &[&str] = &[
    "CNPJ_BASICO",
    "CNPJ_ORDEM",
    "CNPJ_DV",
    "IDENTIFICADOR_MATRIZ_FILIAL",
    "NOME_FANTASIA",
    "SITUACAO_CADASTRAL",
    "DATA_SITUACAO_CADASTRAL",
    "MOTIVO_SITUACAO_CADASTRAL",
    "NOME_CIDADE_EXTERIOR",
    "PAIS",
    "DATA_INICIO_ATIVIDADE",
    "CNAE_FISCAL_PRINCIPAL",
    "CNAE_FISCAL_SECUNDARIA",
    "TIPO_LOGRADOURO",
    "LOGRADOURO",
    "NUMERO",
    "COMPLEMENTO",
    "BAIRRO",
    "CEP",
    "UF",
    "MUNICIPIO",
    "DDD_1",
    "TELEFONE_1",
    "DDD_2",
    "TELEFONE_2",
    "DDD_FAX",
    "FAX",
    "CORREIO_ELETRONICO",
    "SITUACAO_ESPECIAL",
    "DATA_SITUACAO_ESPECIAL",
];

const PARTNER: &[&str] = &[
    "CNPJ_BASICO",
    "IDENTIFICADOR_SOCIO",
    "NOME_SOCIO_RAZAO_SOCIAL",
    "CPF_CNPJ_SOCIO",
    "QUALIFICACAO_SOCIO",
    "DATA_ENTRADA_SOCIEDADE",
    "PAIS",
    "REPRESENTANTE_LEGAL",
    "NOME_DO_REPRESENTANTE",
    "QUALIFICACAO_REPRESENTANTE_LEGAL",
    "FAIXA_ETARIA",
];

const SIMPLES: &[&str] = &[
    "CNPJ_BASICO",
    "OPCAO_PELO_SIMPLES",
    "DATA_OPCAO_SIMPLES",
    "DATA_EXCLUSAO_SIMPLES",
    "OPCAO_MEI",
    "DATA_OPCAO_MEI",
    "DATA_EXCLUSAO_MEI",
];

const REFERENCE: &[&str] = &["CODIGO", "DESCRICAO"];

const REFERENCE_SUFFIXES: &[&str] = &[
    "CNAECSV", "MOTICSV", "MUNICCSV", "NATJUCSV", "PAISCSV", "QUALSCSV",
];

/// Suffix to column-list lookup with a generic fallback and a skip set.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, Vec<String>>,
    generic: Option<String>,
    skip: BTreeSet<String>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        let owned = |cols: &[&str]| cols.iter().map(|c| c.to_string()).collect::<Vec<_>>();

        let mut tables = BTreeMap::new();
        tables.insert("EMPRECSV".to_string(), owned(COMPANY));
        tables.insert("ESTABELE".to_string(), owned(ESTABLISHMENT));
        tables.insert("SOCIOCSV".to_string(), owned(PARTNER));
        tables.insert(GENERIC_SUFFIX.to_string(), owned(SIMPLES));
        for suffix in REFERENCE_SUFFIXES {
            tables.insert(suffix.to_string(), owned(REFERENCE));
        }

        Self {
            tables,
            generic: Some(GENERIC_SUFFIX.to_string()),
            skip: BTreeSet::new(),
        }
    }
}

impl SchemaRegistry {
    /// Build a registry from explicit parts.
    pub fn new(
        tables: BTreeMap<String, Vec<String>>,
        generic: Option<String>,
        skip: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            tables,
            generic,
            skip: skip.into_iter().collect(),
        }
    }

    /// The built-in registry with configured overrides applied.
    pub fn with_overrides(overrides: &SchemaOverrides) -> Self {
        let mut registry = Self::default();
        for (suffix, columns) in &overrides.tables {
            registry.tables.insert(suffix.clone(), columns.clone());
        }
        if let Some(generic) = &overrides.generic {
            registry.generic = Some(generic.clone());
        }
        registry.skip.extend(overrides.skip.iter().cloned());
        registry
    }

    /// Columns for a file-type suffix.
    ///
    /// Skipped suffixes yield `None` regardless of the mapping table;
    /// unlisted suffixes take the generic entry.
    pub fn schema_for(&self, suffix: &str) -> Option<&[String]> {
        if self.skip.contains(suffix) {
            return None;
        }
        self.tables
            .get(suffix)
            .or_else(|| self.generic.as_ref().and_then(|g| self.tables.get(g)))
            .map(Vec::as_slice)
    }
}

/// Arrow schema of a curated partition: nullable strings in declared order.
pub fn arrow_schema(columns: &[String]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    Arc::new(Schema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_lookup() {
        let registry = SchemaRegistry::default();
        let columns = registry.schema_for("ESTABELE").unwrap();
        assert_eq!(columns.len(), 30);
        assert_eq!(&columns[..3], ["CNPJ_BASICO", "CNPJ_ORDEM", "CNPJ_DV"]);
        assert_eq!(registry.schema_for("CNAECSV").unwrap(), ["CODIGO", "DESCRICAO"]);
    }

    #[test]
    fn test_generic_fallback() {
        let registry = SchemaRegistry::default();
        // F.K03200$W.SIMPLES.CSV.D40511 has suffix D40511
        let columns = registry.schema_for("D40511").unwrap();
        assert_eq!(columns[0], KEY_COLUMN);
        assert_eq!(columns[1], "OPCAO_PELO_SIMPLES");
    }

    #[test]
    fn test_no_generic_means_none() {
        let registry = SchemaRegistry::new(BTreeMap::new(), None, Vec::new());
        assert!(registry.schema_for("ANYTHING").is_none());
    }

    #[test]
    fn test_skip_wins_over_mapping() {
        let overrides = SchemaOverrides {
            skip: vec!["EMPRECSV".to_string(), "UNLISTED".to_string()],
            ..Default::default()
        };
        let registry = SchemaRegistry::with_overrides(&overrides);
        assert!(registry.schema_for("EMPRECSV").is_none());
        assert!(registry.schema_for("UNLISTED").is_none());
        assert!(registry.schema_for("SOCIOCSV").is_some());
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let mut tables = BTreeMap::new();
        tables.insert("PAISCSV".to_string(), vec!["COD".to_string(), "NOME".to_string()]);
        tables.insert("NEWTYPE".to_string(), vec!["X".to_string()]);
        let overrides = SchemaOverrides {
            generic: Some("NEWTYPE".to_string()),
            skip: Vec::new(),
            tables,
        };

        let registry = SchemaRegistry::with_overrides(&overrides);
        assert_eq!(registry.schema_for("PAISCSV").unwrap(), ["COD", "NOME"]);
        assert_eq!(registry.schema_for("SOMETHING").unwrap(), ["X"]);
    }

    #[test]
    fn test_arrow_schema_preserves_order() {
        let columns = vec!["c1".to_string(), "c2".to_string(), "c3".to_string()];
        let schema = arrow_schema(&columns);
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, ["c1", "c2", "c3"]);
        assert!(schema.fields().iter().all(|f| f.is_nullable()));
    }
}
