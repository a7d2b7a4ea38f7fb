use std::collections::HashSet;

use crate::domain::{DiseaseEntry, DiseaseSummary};

/// Splits a catalog gene field on commas, upper-casing each symbol.
pub fn catalog_genes(associated_genes: &str) -> HashSet<String> {
    associated_genes
        .split(',')
        .map(str::trim)
        .filter(|gene| !gene.is_empty())
        .map(str::to_uppercase)
        .collect()
}

/// Names of catalog entries sharing at least one gene with `mutated_genes`,
/// in catalog order. Gene comparison ignores case.
pub fn match_diseases<'g, I>(mutated_genes: I, catalog: &[DiseaseEntry]) -> DiseaseSummary
where
    I: IntoIterator<Item = &'g str>,
{
    let detected = mutated_genes
        .into_iter()
        .map(|gene| gene.trim().to_uppercase())
        .filter(|gene| !gene.is_empty())
        .collect::<HashSet<_>>();
    if detected.is_empty() {
        return DiseaseSummary::NoMatches;
    }

    let names = catalog
        .iter()
        .filter(|entry| {
            catalog_genes(&entry.associated_genes)
                .iter()
                .any(|gene| detected.contains(gene))
        })
        .map(|entry| entry.name.clone())
        .collect();
    DiseaseSummary::from_names(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NO_MATCHES;

    fn entry(id: i64, name: &str, genes: &str) -> DiseaseEntry {
        DiseaseEntry {
            id,
            name: name.to_string(),
            description: String::new(),
            associated_genes: genes.to_string(),
        }
    }

    #[test]
    fn matching_ignores_case_and_spacing() {
        let catalog = vec![entry(1, "Breast Cancer", "BRCA1,   TP53")];
        let summary = match_diseases(["brca1"], &catalog);
        assert_eq!(summary, DiseaseSummary::Detected(vec!["Breast Cancer".to_string()]));
    }

    #[test]
    fn catalog_order_is_preserved() {
        let catalog = vec![
            entry(1, "Li-Fraumeni", "TP53"),
            entry(2, "Lynch", "MLH1, MSH2"),
            entry(3, "Breast Cancer", "BRCA1, TP53"),
        ];
        let summary = match_diseases(["tp53", "MSH2"], &catalog);
        assert_eq!(
            summary.names(),
            ["Li-Fraumeni", "Lynch", "Breast Cancer"].map(String::from)
        );
        assert_eq!(summary, match_diseases(["tp53", "MSH2"], &catalog));
    }

    #[test]
    fn empty_input_is_no_matches() {
        let catalog = vec![entry(1, "Breast Cancer", "BRCA1")];
        let summary = match_diseases(Vec::<&str>::new(), &catalog);
        assert_eq!(summary, DiseaseSummary::NoMatches);
        assert_eq!(summary.to_string(), NO_MATCHES);
    }

    #[test]
    fn blank_catalog_genes_never_match() {
        let catalog = vec![entry(1, "Empty", " , ")];
        assert_eq!(match_diseases(["BRCA1"], &catalog), DiseaseSummary::NoMatches);
    }
}
