pub mod annotation;
pub mod app;
pub mod blast;
pub mod config;
pub mod domain;
pub mod error;
pub mod fasta;
pub mod homology;
pub mod http;
pub mod kegg;
pub mod layout;
pub mod output;
pub mod pdb;
pub mod pdbfile;
pub mod qc;
pub mod sequence_resolver;
pub mod store;
pub mod structure_resolver;
pub mod uniprot;
