//! Integration tests for cnpjlake

use cnpjlake::config::Config;
use cnpjlake::engine::Engine;
use cnpjlake::error::{JoinError, PipelineError};
use cnpjlake::layout::Layout;
use cnpjlake::naming::RecordCategory;
use cnpjlake::{Pipeline, PipelineStats};
use deltalake::arrow::array::{Array, AsArray};
use deltalake::arrow::compute::cast;
use deltalake::arrow::datatypes::DataType;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

mod config_tests {
    use super::*;

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
layers:
  staging: "/mnt/staging"
  raw: "/mnt/raw"
  curated: "/mnt/curated"
  sandbox: "/mnt/sandbox"
  dataset: "Dados_Externos/RFB - Base de CNPJs"

ingest:
  encoding: utf8
  batch_size: 4096

schemas:
  skip: ["MOTICSV"]

fetch:
  enabled: false

output:
  label: MONTHLY
  compression: zstd
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.ingest.batch_size, 4096);
        assert!(!config.fetch.enabled);
        assert_eq!(config.output.label, "MONTHLY");
        assert_eq!(config.output.simples_marker, "SIMPLES");

        let layout = Layout::new(&config.layers);
        assert_eq!(
            layout.raw_dir(RecordCategory::Company),
            Path::new("/mnt/raw/Dados_Externos/RFB - Base de CNPJs/EMPRESA")
        );
    }

    #[test]
    fn test_config_defaults() {
        let yaml = r#"
layers:
  staging: "/s"
  raw: "/r"
  curated: "/c"
  sandbox: "/x"
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.ingest.raw_marker, "CSV");
        assert_eq!(config.ingest.batch_size, 8192);
        assert!(config.fetch.enabled);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.output.label, "FINAL");
        assert!(!config.metrics.enabled);
    }
}

mod pipeline_tests {
    use super::*;

    const COMPANY: &str = "K3241.K03200Y0.D40511.EMPRECSV";
    const ESTABLISHMENT: &str = "K3241.K03200Y0.D40511.ESTABELE";
    const PARTNER: &str = "K3241.K03200Y0.D40511.SOCIOCSV";
    const CNAE: &str = "F.K03200$Z.D40511.CNAECSV";
    const SIMPLES: &str = "F.K03200$W.SIMPLES.CSV.D40511";

    /// A staging directory populated with registry archives.
    struct Dump {
        temp: TempDir,
    }

    impl Dump {
        fn new() -> Self {
            let dump = Self {
                temp: TempDir::new().unwrap(),
            };
            std::fs::create_dir_all(dump.layout().staging()).unwrap();
            dump
        }

        fn config(&self) -> Config {
            let root = self.temp.path().to_str().unwrap();
            let yaml = format!(
                r#"
layers:
  staging: "{root}/staging"
  raw: "{root}/raw"
  curated: "{root}/curated"
  sandbox: "{root}/sandbox"
  dataset: "rfb"
fetch:
  enabled: false
"#
            );
            Config::from_yaml(&yaml).unwrap()
        }

        fn layout(&self) -> Layout {
            Layout::new(&self.config().layers)
        }

        /// Write `<name>.zip` holding a single entry `name`.
        fn archive(&self, name: &str, lines: &[String]) -> &Self {
            let path = self.layout().staging().join(format!("{name}.zip"));
            let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
            writer
                .start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            for line in lines {
                writeln!(writer, "{line}").unwrap();
            }
            writer.finish().unwrap();
            self
        }

        /// Archives for every category, one establishment and no matches.
        fn minimal(&self) -> &Self {
            self.archive(COMPANY, &[company("9999", "OUTRA LTDA")])
                .archive(ESTABLISHMENT, &[establishment("0001", "01", "23", "105")])
                .archive(PARTNER, &[partner("9999", "NINGUEM", "105")])
                .archive(CNAE, &[reference("0111301", "Cultivo de arroz")])
                .archive(SIMPLES, &[simples("9999", "N")])
        }

        /// Remove every staged archive, as when a new release replaces the
        /// previous download.
        fn clear_staging(&self) -> &Self {
            let layout = self.layout();
            std::fs::remove_dir_all(layout.staging()).unwrap();
            std::fs::create_dir_all(layout.staging()).unwrap();
            self
        }

        async fn run(&self) -> Result<PipelineStats, PipelineError> {
            Pipeline::new(self.config()).unwrap().run("FINAL").await
        }

        /// Sorted values of `column` in the Parquet snapshot.
        async fn snapshot_column(&self, column: &str) -> Vec<Option<String>> {
            let engine = Engine::new();
            let df = engine
                .read_parquet(&self.layout().snapshot("FINAL"))
                .await
                .unwrap();
            let mut values = Vec::new();
            for batch in df.collect().await.unwrap() {
                let array = cast(batch.column_by_name(column).unwrap(), &DataType::Utf8).unwrap();
                let strings = array.as_string::<i32>();
                for i in 0..strings.len() {
                    values.push(strings.is_valid(i).then(|| strings.value(i).to_string()));
                }
            }
            values.sort();
            values
        }
    }

    fn quoted(fields: &[&str]) -> String {
        fields
            .iter()
            .map(|f| format!("\"{f}\""))
            .collect::<Vec<_>>()
            .join(";")
    }

    fn company(basico: &str, razao: &str) -> String {
        quoted(&[basico, razao, "2062", "49", "1000,00", "01", ""])
    }

    fn establishment(basico: &str, ordem: &str, dv: &str, pais: &str) -> String {
        let mut fields = vec![""; 30];
        fields[0] = basico;
        fields[1] = ordem;
        fields[2] = dv;
        fields[3] = "1";
        fields[9] = pais;
        quoted(&fields)
    }

    fn partner(basico: &str, nome: &str, pais: &str) -> String {
        let mut fields = vec![""; 11];
        fields[0] = basico;
        fields[1] = "2";
        fields[2] = nome;
        fields[6] = pais;
        quoted(&fields)
    }

    fn simples(basico: &str, opcao: &str) -> String {
        quoted(&[basico, opcao, "20070701", "", "N", "", ""])
    }

    fn reference(code: &str, description: &str) -> String {
        quoted(&[code, description])
    }

    fn strings(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_unmatched_establishment_is_kept() {
        let dump = Dump::new();
        dump.minimal();

        let stats = dump.run().await.unwrap();

        assert_eq!(stats.archives_extracted, 5);
        assert_eq!(stats.raw_files_extracted, 5);
        assert_eq!(stats.partitions_written, 5);
        assert_eq!(stats.rows_written, 1);
        assert_eq!(
            dump.snapshot_column("CNPJ_FULL").await,
            strings(&["00010123"])
        );
        assert_eq!(dump.snapshot_column("RAZAO_SOCIAL").await, vec![None]);
        assert_eq!(dump.snapshot_column("OPCAO_PELO_SIMPLES").await, vec![None]);
    }

    #[tokio::test]
    async fn test_partners_fan_out_and_keep_country() {
        let dump = Dump::new();
        dump.minimal()
            .archive(COMPANY, &[company("0001", "ACME SA")])
            .archive(
                PARTNER,
                &[
                    partner("0001", "ANA", "105"),
                    partner("0001", "BRUNO", "249"),
                ],
            )
            .archive(SIMPLES, &[simples("0001", "S")]);

        let stats = dump.run().await.unwrap();

        assert_eq!(stats.rows_written, 2);
        assert_eq!(
            dump.snapshot_column("NOME_SOCIO_RAZAO_SOCIAL").await,
            strings(&["ANA", "BRUNO"])
        );
        assert_eq!(
            dump.snapshot_column("RAZAO_SOCIAL").await,
            strings(&["ACME SA", "ACME SA"])
        );
        assert_eq!(
            dump.snapshot_column("OPCAO_PELO_SIMPLES").await,
            strings(&["S", "S"])
        );
        assert_eq!(dump.snapshot_column("PAIS").await, strings(&["105", "105"]));
        assert_eq!(
            dump.snapshot_column("PAIS_SOCIO").await,
            strings(&["105", "249"])
        );
    }

    #[tokio::test]
    async fn test_multi_part_category_is_stacked() {
        let dump = Dump::new();
        dump.minimal();
        let first: Vec<String> = (0..5).map(|i| company(&format!("1{i}"), "A")).collect();
        let second: Vec<String> = (0..3).map(|i| company(&format!("2{i}"), "B")).collect();
        dump.archive(COMPANY, &first)
            .archive("K3242.K03200Y0.D40511.EMPRECSV", &second);

        let stats = dump.run().await.unwrap();

        assert_eq!(stats.rows_stacked[&RecordCategory::Company], 8);
        assert_eq!(stats.rows_stacked[&RecordCategory::Establishment], 1);
        assert_eq!(stats.rows_stacked[&RecordCategory::Partner], 1);
        assert!(!stats.rows_stacked.contains_key(&RecordCategory::Support));
    }

    #[tokio::test]
    async fn test_rerun_overwrites_outputs() {
        let dump = Dump::new();
        dump.minimal();
        dump.run().await.unwrap();

        dump.archive(
            ESTABLISHMENT,
            &[
                establishment("0001", "01", "23", "105"),
                establishment("0002", "01", "45", "105"),
            ],
        );
        let stats = dump.run().await.unwrap();

        assert_eq!(stats.rows_written, 2);
        assert_eq!(
            dump.snapshot_column("CNPJ_FULL").await,
            strings(&["00010123", "00020145"])
        );

        let url = cnpjlake::sink::delta::table_url(&dump.layout().delta_table("FINAL")).unwrap();
        let table = deltalake::open_table_with_storage_options(url, Default::default())
            .await
            .unwrap();
        assert!(table.version().unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_stale_versions_are_pruned() {
        let dump = Dump::new();
        dump.minimal();
        let layout = dump.layout();

        let old_raw = layout
            .raw_dir(RecordCategory::Company)
            .join("K3241.K03200X9.D40410.EMPRECSV");
        let old_partition =
            layout.curated_partition(RecordCategory::Company, "K3241.K03200X9.D40410.EMPRECSV");
        std::fs::create_dir_all(old_raw.parent().unwrap()).unwrap();
        std::fs::write(&old_raw, company("7777", "VELHA")).unwrap();
        std::fs::create_dir_all(&old_partition).unwrap();

        let stats = dump.run().await.unwrap();

        assert!(!old_raw.exists());
        assert!(!old_partition.exists());
        assert!(
            layout
                .curated_partition(RecordCategory::Company, COMPANY)
                .is_dir()
        );
        assert!(
            layout
                .curated_partition(RecordCategory::Support, SIMPLES)
                .is_dir()
        );
        assert_eq!(stats.stale_paths_removed, 2);
        assert_eq!(stats.rows_stacked[&RecordCategory::Company], 1);
    }

    #[tokio::test]
    async fn test_next_release_replaces_previous() {
        let dump = Dump::new();
        dump.minimal();
        dump.run().await.unwrap();

        dump.clear_staging()
            .archive(
                "K3241.K03300Y0.D40611.EMPRECSV",
                &[company("0002", "NOVA SA")],
            )
            .archive(
                "K3241.K03300Y0.D40611.ESTABELE",
                &[establishment("0002", "01", "45", "105")],
            )
            .archive(
                "K3241.K03300Y0.D40611.SOCIOCSV",
                &[partner("0002", "CARLA", "105")],
            )
            .archive(
                "F.K03300$Z.D40611.CNAECSV",
                &[reference("0111301", "Cultivo de arroz")],
            )
            .archive("F.K03300$W.SIMPLES.CSV.D40611", &[simples("0002", "S")]);

        let stats = dump.run().await.unwrap();

        // Five raw files and five curated partitions from the first release
        assert_eq!(stats.stale_paths_removed, 10);
        assert_eq!(stats.rows_written, 1);
        assert_eq!(
            dump.snapshot_column("CNPJ_FULL").await,
            strings(&["00020145"])
        );
        assert_eq!(
            dump.snapshot_column("RAZAO_SOCIAL").await,
            strings(&["NOVA SA"])
        );
        assert_eq!(
            dump.snapshot_column("OPCAO_PELO_SIMPLES").await,
            strings(&["S"])
        );

        let support = dump.layout().curated_dir(RecordCategory::Support);
        assert!(support.join("F.K03300$W.SIMPLES.CSV.D40611").is_dir());
        assert!(!support.join(SIMPLES).exists());
    }

    #[tokio::test]
    async fn test_ambiguous_simples_reference_fails() {
        let dump = Dump::new();
        dump.minimal()
            .archive("F.K03200$X.SIMPLES.CSV.D40511", &[simples("0001", "S")]);

        let err = dump.run().await.unwrap_err();
        match err {
            PipelineError::Join {
                source: JoinError::AmbiguousReference { matches, .. },
            } => assert_eq!(matches.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dump.layout().snapshot("FINAL").exists());
    }

    #[tokio::test]
    async fn test_corrupted_archive_without_fetch_fails() {
        let dump = Dump::new();
        dump.minimal();
        std::fs::write(
            dump.layout().staging().join(format!("{PARTNER}.zip")),
            b"truncated download",
        )
        .unwrap();

        let err = dump.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Extract { .. }));
    }
}
