//! Names of the staged artifacts and the warehouse tables they load into.
//! Both are consumed by downstream stages and the dashboard; renaming one is a
//! breaking change.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Artifact {
    /// Staging store key (and object-store file name).
    pub name: &'static str,
    /// Warehouse table the artifact is loaded into, when it is tabular.
    pub table: Option<&'static str>,
}

pub const RAW_LISTINGS: Artifact = Artifact {
    name: "imoveis.csv",
    table: Some("imoveis"),
};

pub const RAW_HISTORICAL: Artifact = Artifact {
    name: "dados_historicos.csv",
    table: Some("dados_historicos"),
};

pub const DERIVED: Artifact = Artifact {
    name: "variaveis.csv",
    table: Some("variaveis"),
};

pub const MODEL: Artifact = Artifact {
    name: "modelo_valorizacao.json",
    table: None,
};

pub const SCORED: Artifact = Artifact {
    name: "predicoes_valorizacao.csv",
    table: Some("predicoes_valorizacao"),
};

pub const RANKING: Artifact = Artifact {
    name: "ranking_bairros.csv",
    table: Some("ranking_bairros"),
};
