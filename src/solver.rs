//! Levenberg-Marquardt solver for small dense least-squares problems

use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace};

use crate::error::{CalibrationError, Result};
use crate::types::{Real, SolverSettings};

/// A nonlinear least-squares problem `min 0.5 * |r(x)|^2`
pub trait LeastSquaresProblem<T: Real> {
    fn num_parameters(&self) -> usize;

    fn num_residuals(&self) -> usize;

    /// Residual vector at `params`, of length [`num_residuals`](Self::num_residuals)
    fn residuals(&self, params: &DVector<T>) -> DVector<T>;
}

/// Why the solver stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Gradient max-norm fell below the gradient tolerance
    GradientTolerance,
    /// Relative cost decrease fell below the function tolerance
    FunctionTolerance,
    /// Relative step size fell below the parameter tolerance
    ParameterTolerance,
    /// Damping exceeded its bound without finding a lower cost
    DampingExhausted,
}

/// Outcome of a successful solver run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSummary<T: Real> {
    /// Iterations performed, rejected steps included
    pub iterations: usize,
    pub initial_cost: T,
    pub final_cost: T,
    pub termination: Termination,
}

/// Minimize `problem` starting from `initial`
///
/// The Jacobian is approximated by central differences. Each iteration
/// solves the damped normal equations `(J'J + lambda * diag(J'J)) dx = -J'r`,
/// accepting the step only if it lowers the cost.
///
/// Returns [`CalibrationError::NotConverged`] when the iteration cap is hit
/// or when damping runs out away from a stationary point, and
/// [`CalibrationError::NumericalFailure`] when the cost stops being finite.
pub fn levenberg_marquardt<T, P>(
    problem: &P,
    initial: DVector<T>,
    settings: &SolverSettings,
) -> Result<(DVector<T>, SolverSummary<T>)>
where
    T: Real,
    P: LeastSquaresProblem<T> + ?Sized,
{
    let function_tolerance: T = nalgebra::convert(settings.function_tolerance);
    let parameter_tolerance: T = nalgebra::convert(settings.parameter_tolerance);
    let gradient_tolerance: T = nalgebra::convert(settings.gradient_tolerance);
    let max_lambda: T = nalgebra::convert(settings.max_lambda);
    let ten: T = nalgebra::convert(10.0);
    let min_diagonal: T = nalgebra::convert(1e-12);

    debug_assert_eq!(initial.len(), problem.num_parameters());
    debug!(
        "solving {} residuals over {} parameters",
        problem.num_residuals(),
        problem.num_parameters()
    );

    let mut x = initial;
    let mut residuals = problem.residuals(&x);
    let mut cost = half_squared_norm(&residuals)?;
    let initial_cost = cost;
    let mut lambda: T = nalgebra::convert(settings.initial_lambda);

    let finish = |iterations: usize, final_cost: T, termination: Termination| {
        debug!(
            "solver stopped after {} iterations: {:?}, cost {} -> {}",
            iterations, termination, initial_cost, final_cost
        );
        SolverSummary {
            iterations,
            initial_cost,
            final_cost,
            termination,
        }
    };

    if cost == T::zero() {
        return Ok((x, finish(0, cost, Termination::FunctionTolerance)));
    }

    let mut jacobian = numeric_jacobian(problem, &x, &residuals);
    for iteration in 1..=settings.max_iterations {
        let gradient = jacobian.transpose() * &residuals;
        if gradient.amax() <= gradient_tolerance {
            return Ok((x, finish(iteration - 1, cost, Termination::GradientTolerance)));
        }

        let normal = jacobian.transpose() * &jacobian;
        let mut damped = normal.clone();
        for i in 0..damped.nrows() {
            damped[(i, i)] += lambda * normal[(i, i)].max(min_diagonal);
        }

        let Some(step) = solve_normal_equations(damped, -&gradient) else {
            lambda *= ten;
            if lambda > max_lambda {
                return damping_exhausted(x, &gradient, &jacobian, &residuals, iteration)
                    .map(|x| (x, finish(iteration, cost, Termination::DampingExhausted)));
            }
            continue;
        };

        let candidate = &x + &step;
        let candidate_residuals = problem.residuals(&candidate);
        let candidate_cost = match half_squared_norm(&candidate_residuals) {
            Ok(c) => c,
            // Overshooting into a non-finite region is a rejected step
            Err(_) => {
                lambda *= ten;
                if lambda > max_lambda {
                    return damping_exhausted(x, &gradient, &jacobian, &residuals, iteration)
                        .map(|x| (x, finish(iteration, cost, Termination::DampingExhausted)));
                }
                continue;
            }
        };
        trace!(
            "iteration {}: cost {} candidate {} lambda {}",
            iteration, cost, candidate_cost, lambda
        );

        if candidate_cost < cost {
            let decrease = cost - candidate_cost;
            let step_norm = step.norm();
            let x_norm = x.norm();

            x = candidate;
            residuals = candidate_residuals;
            let previous_cost = cost;
            cost = candidate_cost;
            lambda /= ten;

            if cost == T::zero() || decrease <= function_tolerance * previous_cost {
                return Ok((x, finish(iteration, cost, Termination::FunctionTolerance)));
            }
            if step_norm <= parameter_tolerance * (x_norm + parameter_tolerance) {
                return Ok((x, finish(iteration, cost, Termination::ParameterTolerance)));
            }
            jacobian = numeric_jacobian(problem, &x, &residuals);
        } else {
            lambda *= ten;
            if lambda > max_lambda {
                return damping_exhausted(x, &gradient, &jacobian, &residuals, iteration)
                    .map(|x| (x, finish(iteration, cost, Termination::DampingExhausted)));
            }
        }
    }

    debug!(
        "solver hit the iteration cap ({}) at cost {}",
        settings.max_iterations, cost
    );
    Err(CalibrationError::NotConverged {
        iterations: settings.max_iterations,
    })
}

/// Accept `x` after damping ran out only if it is a stationary point
///
/// The gradient `J'r` must be small against `|J| * |r|`, with the scale
/// floored at one so that zero-residual fits pass.
fn damping_exhausted<T: Real>(
    x: DVector<T>,
    gradient: &DVector<T>,
    jacobian: &DMatrix<T>,
    residuals: &DVector<T>,
    iterations: usize,
) -> Result<DVector<T>> {
    let scale = (jacobian.norm() * residuals.norm()).max(T::one());
    let tolerance = T::default_epsilon().sqrt() * scale;
    let finite = gradient.iter().all(|g| g.is_finite());
    if finite && gradient.amax() <= tolerance {
        Ok(x)
    } else {
        debug!(
            "damping exhausted away from a stationary point, gradient {}",
            gradient.amax()
        );
        Err(CalibrationError::NotConverged { iterations })
    }
}

fn half_squared_norm<T: Real>(residuals: &DVector<T>) -> Result<T> {
    let half: T = nalgebra::convert(0.5);
    let cost = residuals.norm_squared() * half;
    if cost.is_finite() {
        Ok(cost)
    } else {
        Err(CalibrationError::NumericalFailure)
    }
}

fn solve_normal_equations<T: Real>(matrix: DMatrix<T>, rhs: DVector<T>) -> Option<DVector<T>> {
    let step = match matrix.clone().cholesky() {
        Some(cholesky) => Some(cholesky.solve(&rhs)),
        None => matrix.lu().solve(&rhs),
    };
    step.filter(|step| step.iter().all(|v| v.is_finite()))
}

/// Central difference Jacobian of the residuals at `x`
fn numeric_jacobian<T, P>(problem: &P, x: &DVector<T>, residuals: &DVector<T>) -> DMatrix<T>
where
    T: Real,
    P: LeastSquaresProblem<T> + ?Sized,
{
    let two: T = nalgebra::convert(2.0);
    let three: T = nalgebra::convert(3.0);
    // Relative step of cbrt(epsilon), never below that in absolute terms
    let relative_step = T::default_epsilon().powf(T::one() / three);

    let mut jacobian = DMatrix::zeros(residuals.len(), x.len());
    let mut probe = x.clone();
    for j in 0..x.len() {
        let h = relative_step * x[j].abs().max(T::one());
        let original = probe[j];

        probe[j] = original + h;
        let forward = problem.residuals(&probe);
        probe[j] = original - h;
        let backward = problem.residuals(&probe);
        probe[j] = original;

        jacobian.set_column(j, &((forward - backward) / (two * h)));
    }
    jacobian
}
