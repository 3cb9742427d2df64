//! # cpa-rs: Configurable program analysis over BDD regions
//!
//! **`cpa-rs`** implements the core of a configurable program analysis:
//! predicate abstraction of path formulas and a composite product of
//! abstract domains that share a call stack.
//!
//! ## Layers
//!
//! - **[`bdd`]** and **[`region`]**: a complement-edge BDD manager and the
//!   [`RegionCreator`][crate::region::RegionCreator] algebra built on it.
//!   Abstract states of the predicate analysis are regions over one
//!   variable per predicate.
//! - **[`formula`]**, **[`ssa`]** and **[`path_formula`]**: quantifier-free
//!   formulas over integer terms, SSA indexing, and path formulas summarizing
//!   sequences of [`cfa`] edges.
//! - **[`solver`]**: a small decision procedure with incremental prover
//!   environments and all-SAT enumeration over predicate variables.
//! - **[`predicate`]**: canonical predicates, the
//!   [`PredicateAbstractionManager`][crate::predicate::PredicateAbstractionManager]
//!   (Boolean and Cartesian abstraction with caching, coverage checks,
//!   reduce/expand) and the predicate CPA.
//! - **[`cpa`]**: the CPA traits, the
//!   [`CompositeCpa`][crate::cpa::composite::CompositeCpa] product, peer
//!   domains (location, sign, explicit values) and the worklist algorithm.
//!
//! ## Basic Usage
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use cpa_rs::cfa::{BinaryOp, CfaBuilder, Expr};
//! use cpa_rs::cpa::algorithm::CpaAlgorithm;
//! use cpa_rs::cpa::composite::{CompositeCpa, CompositeOptions};
//! use cpa_rs::cpa::erase;
//! use cpa_rs::cpa::location::LocationCpa;
//! use cpa_rs::cpa::sign::{Sign, SignCpa, SignElement};
//!
//! // x = 5; if (x > 0) { A } else { B }
//! let mut builder = CfaBuilder::new("main");
//! let entry = builder.function("main");
//! let n1 = builder.node();
//! let a = builder.node();
//! let b = builder.node();
//! builder.assign(entry, n1, "x", Expr::constant(5));
//! builder.branch(n1, a, b, Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::constant(0)));
//! let cfa = Rc::new(builder.build());
//!
//! let cpa = CompositeCpa::new(
//!     vec![erase(LocationCpa::new(cfa.clone())), erase(SignCpa::default())],
//!     CompositeOptions::default(),
//! );
//! let algorithm = CpaAlgorithm::new(&cpa, &cfa);
//! let mut reached = algorithm.initial_reached_set(false);
//! algorithm.run(&mut reached).unwrap();
//!
//! let at_a = reached.at(a);
//! assert_eq!(at_a[0].component::<SignElement>().unwrap().get("x"), Sign::Pos);
//! assert!(reached.at(b).is_empty());
//! ```

pub mod bdd;
pub mod cache;
pub mod cfa;
pub mod cpa;
pub mod error;
pub mod formula;
pub mod options;
pub mod path_formula;
pub mod predicate;
pub mod reference;
pub mod region;
pub mod solver;
pub mod ssa;
pub mod utils;
