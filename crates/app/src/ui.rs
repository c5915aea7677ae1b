//! Read-only terminal view of the session
//!
//! Renders the latest pushed snapshot and presence markers. Issues no
//! commands; quitting tears the session down from main.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use firedeck_net::{GameState, Presence, SessionEvent, Story, Transport, Vote};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use ratatui::Terminal;
use tracing::info;

/// Everything the display knows about the session.
#[derive(Default)]
struct View {
    game: GameState,
    presence: HashMap<String, Presence>,
    host: String,
    ended: bool,
}

pub async fn run(transport: &mut Transport) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(transport, &mut terminal).await;

    disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn event_loop(
    transport: &mut Transport,
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
) -> io::Result<()> {
    let mut view = View::default();
    let mut input = tokio::time::interval(Duration::from_millis(100));

    loop {
        terminal.draw(|frame| render(frame, &view))?;

        tokio::select! {
            event = transport.next_event(), if !view.ended => {
                match event {
                    Some(SessionEvent::Game(state)) => view.game = state,
                    Some(SessionEvent::Handshake(handshake)) => view.host = handshake.host,
                    Some(SessionEvent::Presence(presence)) => {
                        view.presence.insert(presence.id.clone(), presence);
                    }
                    Some(SessionEvent::Participant(participant)) => {
                        info!(name = %participant.full_name, "participant joined");
                    }
                    Some(SessionEvent::Disconnected) | None => view.ended = true,
                }
            }
            _ = input.tick() => {
                if quit_requested()? {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                return Ok(());
            }
        }
    }
}

/// Drain whatever input is buffered; `q`, `Esc` and Ctrl-C quit.
fn quit_requested() -> io::Result<bool> {
    while event::poll(Duration::ZERO)? {
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(true)
                }
                _ => {}
            }
        }
    }
    Ok(false)
}

fn render(frame: &mut ratatui::Frame, view: &View) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(55),
            Constraint::Percentage(45),
        ])
        .split(frame.size());

    let status = if view.ended {
        "disconnected".to_string()
    } else if view.host.is_empty() {
        "connecting".to_string()
    } else {
        view.host.clone()
    };
    let header = Paragraph::new(format!("{} — {}", view.game.name, view.game.description))
        .block(
            Block::default()
                .title(format!("Firedeck [{status}]"))
                .borders(Borders::ALL),
        );
    frame.render_widget(header, rows[0]);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[1]);

    let stories: Vec<ListItem> = sorted_stories(&view.game)
        .into_iter()
        .map(|story| {
            let item = ListItem::new(format!("{} [{}]", story.title, story.status));
            if story.status == "active" {
                item.style(Style::default().add_modifier(Modifier::BOLD))
            } else {
                item
            }
        })
        .collect();
    frame.render_widget(
        List::new(stories).block(Block::default().title("Stories").borders(Borders::ALL)),
        middle[0],
    );

    let estimate = &view.game.estimate;
    let mut preview = vec![format!("{} [{}]", estimate.title, estimate.status)];
    for vote in sorted_votes(&view.game) {
        preview.push(format!("  {}: {} points", vote.user.full_name, vote.points));
    }
    frame.render_widget(
        Paragraph::new(preview.join("\n"))
            .block(Block::default().title("Estimate").borders(Borders::ALL)),
        middle[1],
    );

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[2]);

    frame.render_widget(
        Paragraph::new(format!("deck {}", view.game.deck))
            .block(Block::default().title("Deck").borders(Borders::ALL)),
        bottom[0],
    );

    let mut members: Vec<_> = view.game.participants.values().collect();
    members.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    let roster: Vec<ListItem> = members
        .into_iter()
        .map(|member| {
            let marker = match view.presence.get(&member.id) {
                Some(presence) if presence.online => "+",
                Some(_) => "-",
                None => " ",
            };
            let voted = if member.has_voted { " [voted]" } else { "" };
            ListItem::new(format!("{marker} {}{voted}", member.full_name))
        })
        .collect();
    frame.render_widget(
        List::new(roster).block(Block::default().title("Participants").borders(Borders::ALL)),
        bottom[1],
    );
}

fn sorted_stories(game: &GameState) -> Vec<&Story> {
    let mut stories: Vec<&Story> = game.stories.values().collect();
    stories.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.title.cmp(&b.title)));
    stories
}

fn sorted_votes(game: &GameState) -> Vec<&Vote> {
    let mut votes: Vec<&Vote> = game.estimate.results.values().collect();
    votes.sort_by(|a, b| a.user.full_name.cmp(&b.user.full_name));
    votes
}
