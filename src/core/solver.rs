//! Bounded scalar inversion of a dielectric model
//!
//! Minimizes `|observed - model(mv, fixed)|` over `[lower_bound, upper_bound]` with Brent's
//! method. Any failure maps to the configured invalid value.

use crate::core::dielectric::ForwardModel;
use crate::types::{RetrievalError, RetrievalResult, INVALID_OUTPUT_VALUE};
use argmin::core::{CostFunction, Error, Executor, State, TerminationReason};
use argmin::solver::brent::BrentOpt;
use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Solver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverParams {
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub absolute_tolerance: f64,
    pub relative_tolerance: f64,
    pub max_iterations: u64,
    pub max_evaluations: usize,
    /// Returned when the solver fails
    pub invalid_value: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            lower_bound: 0.0,
            upper_bound: 0.6,
            absolute_tolerance: 1e-11,
            relative_tolerance: 1e-9,
            max_iterations: 100,
            max_evaluations: 1000,
            invalid_value: INVALID_OUTPUT_VALUE,
        }
    }
}

impl SolverParams {
    pub fn validate(&self) -> RetrievalResult<()> {
        if !self.lower_bound.is_finite() || !self.upper_bound.is_finite() {
            return Err(RetrievalError::config("bounds", "bounds must be finite"));
        }
        if self.lower_bound >= self.upper_bound {
            return Err(RetrievalError::config(
                "bounds",
                format!(
                    "lower bound {} must be below upper bound {}",
                    self.lower_bound, self.upper_bound
                ),
            ));
        }
        if !(self.absolute_tolerance > 0.0) || !(self.relative_tolerance > 0.0) {
            return Err(RetrievalError::config("tolerance", "tolerances must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(RetrievalError::config("max_iterations", "must be positive"));
        }
        if self.max_evaluations == 0 {
            return Err(RetrievalError::config("max_evaluations", "must be positive"));
        }
        Ok(())
    }
}

/// Why a solve produced no value
#[derive(Debug, Clone, PartialEq)]
pub enum SolveFailure {
    /// Iteration or evaluation cap reached
    NotConverged,
    /// Non-finite objective or internal solver error
    Numerical(String),
}

/// Converged solution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solution {
    pub value: f64,
    /// Remaining misfit `|observed - model(value)|`
    pub residual: f64,
    pub iterations: u64,
    pub evaluations: usize,
}

/// Objective `|observed - model(mv, fixed)|` with an evaluation counter
struct Misfit<'a> {
    model: &'a ForwardModel,
    observed: f64,
    fixed: &'a [f64],
    evaluations: &'a Cell<usize>,
    max_evaluations: usize,
}

impl CostFunction for Misfit<'_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, mv: &Self::Param) -> Result<Self::Output, Error> {
        let count = self.evaluations.get() + 1;
        self.evaluations.set(count);
        if count > self.max_evaluations {
            return Err(Error::msg("maximum number of evaluations exceeded"));
        }

        let misfit = (self.observed - self.model.predict(*mv, self.fixed)).abs();
        if !misfit.is_finite() {
            return Err(Error::msg(format!("non-finite objective at mv = {}", mv)));
        }
        Ok(misfit)
    }
}

/// Brent minimizer over one forward model
#[derive(Debug, Clone)]
pub struct ScalarInversionSolver {
    model: ForwardModel,
    params: SolverParams,
}

impl ScalarInversionSolver {
    pub fn new(model: ForwardModel, params: SolverParams) -> RetrievalResult<Self> {
        params.validate()?;
        Ok(Self { model, params })
    }

    pub fn model(&self) -> &ForwardModel {
        &self.model
    }

    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Moisture best explaining `observed`, or the invalid value on failure
    pub fn minimize(&self, observed: f64, fixed: &[f64]) -> f64 {
        match self.solve(observed, fixed) {
            Ok(solution) => solution.value,
            Err(_) => self.params.invalid_value,
        }
    }

    pub fn solve(&self, observed: f64, fixed: &[f64]) -> Result<Solution, SolveFailure> {
        if !observed.is_finite() || fixed.iter().any(|v| !v.is_finite()) {
            return Err(SolveFailure::Numerical("non-finite input".to_string()));
        }
        if fixed.len() != self.model.num_fixed() {
            return Err(SolveFailure::Numerical(format!(
                "expected {} fixed inputs, got {}",
                self.model.num_fixed(),
                fixed.len()
            )));
        }

        let evaluations = Cell::new(0);
        let problem = Misfit {
            model: &self.model,
            observed,
            fixed,
            evaluations: &evaluations,
            max_evaluations: self.params.max_evaluations,
        };

        let solver = BrentOpt::new(self.params.lower_bound, self.params.upper_bound)
            .set_tolerance(self.params.relative_tolerance, self.params.absolute_tolerance);

        let max_iterations = self.params.max_iterations;
        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(max_iterations))
            .timer(false)
            .run();

        let result = match result {
            Ok(result) => result,
            Err(_) if evaluations.get() > self.params.max_evaluations => {
                return Err(SolveFailure::NotConverged);
            }
            Err(e) => return Err(SolveFailure::Numerical(e.to_string())),
        };

        let state = result.state();
        if let Some(TerminationReason::MaxItersReached) = state.get_termination_reason() {
            return Err(SolveFailure::NotConverged);
        }

        let value = match state.get_best_param() {
            Some(&value) if value.is_finite() => value,
            _ => return Err(SolveFailure::Numerical("solver returned no parameter".to_string())),
        };

        if value < self.params.lower_bound || value > self.params.upper_bound {
            return Err(SolveFailure::Numerical(format!(
                "solution {} outside [{}, {}]",
                value, self.params.lower_bound, self.params.upper_bound
            )));
        }

        Ok(Solution {
            value,
            residual: state.get_best_cost(),
            iterations: state.get_iter(),
            evaluations: evaluations.get(),
        })
    }
}
