//! Stoppable transforms and their composition.
//!
//! A [Transform](trait.Transform.html) is a cooperative state object: the host
//! [feeds](trait.Transform.html#tymethod.feed) it input values and then polls
//! [next](trait.Transform.html#tymethod.next) until it answers
//! [NotReady](enum.Next.html#variant.NotReady) (feed more input) or
//! [End](enum.Next.html#variant.End) (nothing will ever come out again).
//! Transforms never block and never perform I/O themselves, which allows a
//! single thread to drive a whole pipeline of them.
//!
//! Two transforms compose left to right with [Compose](struct.Compose.html):
//! the output stream of the left transform becomes the input stream of the
//! right one, and errors of either side are kept apart by
//! [ComposeError](enum.ComposeError.html).

use thiserror::Error;

/// Result of polling a transform.
///
/// Errors travel inside `Ready` as ordinary values. A well-behaved transform
/// emits an error at most once and answers `End` ever after.
#[derive(Clone, Debug, PartialEq)]
pub enum Next<T, E> {
    /// The next output value or a decoding error.
    Ready(Result<T, E>),
    /// More input is needed before anything can be produced.
    NotReady,
    /// The output stream has ended.
    End,
}

/// A pollable, stoppable stream transformer.
///
/// The `stopped` argument of [next](#tymethod.next) must be set to `true` once
/// the producer has signalled end of input. From that point on the transform
/// drains whatever it has buffered and finally answers [Next::End].
pub trait Transform {
    type Input;
    type Output;
    type Error;

    /// Appends one input value to the transform.
    fn feed(&mut self, input: Self::Input);

    /// Produces the next output value, if any is available.
    fn next(&mut self, stopped: bool) -> Next<Self::Output, Self::Error>;
}

/// Error of a [composed](struct.Compose.html) transform: either side failed.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ComposeError<L, R> {
    #[error("{0}")]
    Left(L),
    #[error("{0}")]
    Right(R),
}

/// Two transforms chained left to right.
///
/// `Compose` is itself a transform, so pipelines of any length are built by
/// nesting. Polling the composition pulls values through the left side on
/// demand and only tells the right side `stopped` once the left side has
/// ended.
pub struct Compose<A, B> {
    left: A,
    right: B,
    left_ended: bool,
}

impl<A, B> Compose<A, B>
where
    A: Transform,
    B: Transform<Input = A::Output>,
{
    pub fn new(left: A, right: B) -> Self {
        Compose {
            left,
            right,
            left_ended: false,
        }
    }
}

impl<A, B> Transform for Compose<A, B>
where
    A: Transform,
    B: Transform<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;
    type Error = ComposeError<A::Error, B::Error>;

    fn feed(&mut self, input: A::Input) {
        self.left.feed(input);
    }

    fn next(&mut self, stopped: bool) -> Next<B::Output, Self::Error> {
        loop {
            match self.right.next(self.left_ended) {
                Next::Ready(Ok(value)) => return Next::Ready(Ok(value)),
                Next::Ready(Err(e)) => return Next::Ready(Err(ComposeError::Right(e))),
                Next::End => return Next::End,
                Next::NotReady => {}
            }
            if self.left_ended {
                return Next::NotReady;
            }
            match self.left.next(stopped) {
                Next::Ready(Ok(value)) => self.right.feed(value),
                Next::Ready(Err(e)) => return Next::Ready(Err(ComposeError::Left(e))),
                Next::NotReady => return Next::NotReady,
                Next::End => self.left_ended = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Splits fed strings into whitespace separated words.
    struct Words {
        queue: VecDeque<String>,
    }

    /// Parses words into numbers, fails on the first non-number.
    struct Numbers {
        queue: VecDeque<String>,
        failed: bool,
    }

    impl Transform for Words {
        type Input = String;
        type Output = String;
        type Error = String;

        fn feed(&mut self, input: String) {
            self.queue
                .extend(input.split_whitespace().map(str::to_string));
        }

        fn next(&mut self, stopped: bool) -> Next<String, String> {
            match self.queue.pop_front() {
                Some(word) => Next::Ready(Ok(word)),
                None if stopped => Next::End,
                None => Next::NotReady,
            }
        }
    }

    impl Transform for Numbers {
        type Input = String;
        type Output = u32;
        type Error = String;

        fn feed(&mut self, input: String) {
            self.queue.push_back(input);
        }

        fn next(&mut self, stopped: bool) -> Next<u32, String> {
            if self.failed {
                return Next::End;
            }
            match self.queue.pop_front() {
                Some(word) => match word.parse() {
                    Ok(value) => Next::Ready(Ok(value)),
                    Err(_) => {
                        self.failed = true;
                        Next::Ready(Err(word))
                    }
                },
                None if stopped => Next::End,
                None => Next::NotReady,
            }
        }
    }

    fn pipeline() -> Compose<Words, Numbers> {
        Compose::new(
            Words {
                queue: VecDeque::new(),
            },
            Numbers {
                queue: VecDeque::new(),
                failed: false,
            },
        )
    }

    #[test]
    fn compose_pulls_through_both_sides() {
        let mut pipeline = pipeline();
        assert_eq!(pipeline.next(false), Next::NotReady);
        pipeline.feed("1 2".to_string());
        assert_eq!(pipeline.next(false), Next::Ready(Ok(1)));
        assert_eq!(pipeline.next(false), Next::Ready(Ok(2)));
        assert_eq!(pipeline.next(false), Next::NotReady);
        pipeline.feed("3".to_string());
        assert_eq!(pipeline.next(true), Next::Ready(Ok(3)));
        assert_eq!(pipeline.next(true), Next::End);
    }

    #[test]
    fn compose_wraps_right_errors() {
        let mut pipeline = pipeline();
        pipeline.feed("7 oops 8".to_string());
        assert_eq!(pipeline.next(false), Next::Ready(Ok(7)));
        assert_eq!(
            pipeline.next(false),
            Next::Ready(Err(ComposeError::Right("oops".to_string())))
        );
        assert_eq!(pipeline.next(true), Next::End);
    }
}
